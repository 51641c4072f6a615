// THEORY:
// The `NavService` puts one `NavPipeline` behind a tokio actor. The pipeline is strictly
// single-threaded, so the actor owns it outright and serializes every request: frames are
// sent down a bounded channel and each one is answered on its own oneshot reply channel.
// Async callers (a robot's control loop, a network front end) can then share the
// pipeline by cloning the sender side without any locking.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::pipeline::{FrameSet, NavPipeline, NavReport};

/// Requests accepted by the pipeline actor.
enum NavMessage {
    Frame(FrameSet, oneshot::Sender<Result<NavReport>>),
    Shutdown,
}

/// Handle to a running pipeline actor.
#[derive(Debug, Clone)]
pub struct NavService {
    tx: mpsc::Sender<NavMessage>,
}

impl std::fmt::Debug for NavMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NavMessage::Frame(..) => f.write_str("Frame"),
            NavMessage::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl NavService {
    /// Spawn the actor on the current tokio runtime. `depth` bounds the number of frames
    /// waiting to be processed.
    pub fn spawn(mut pipeline: NavPipeline, depth: usize) -> (Self, JoinHandle<NavPipeline>) {
        let (tx, mut rx) = mpsc::channel::<NavMessage>(depth.max(1));
        let handle = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    NavMessage::Frame(frame, reply) => {
                        let report = pipeline.process(&frame);
                        if let Err(e) = &report {
                            log::warn!("nav service: frame failed: {}", e);
                        }
                        let _ = reply.send(report);
                    }
                    NavMessage::Shutdown => break,
                }
            }
            log::info!("nav service: stopped");
            pipeline
        });
        (Self { tx }, handle)
    }

    /// Submit a frame and wait for its report.
    pub async fn process(&self, frame: FrameSet) -> Result<NavReport> {
        let (reply, answer) = oneshot::channel();
        self.tx.send(NavMessage::Frame(frame, reply)).await.map_err(|_| Error::ServiceClosed)?;
        answer.await.map_err(|_| Error::ServiceClosed)?
    }

    /// Ask the actor to stop after the frames already queued.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(NavMessage::Shutdown).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::camera::CameraRecord;
    use crate::core_modules::image::Image;
    use crate::pipeline::NavConfig;

    fn floor() -> Image {
        let mut d = Image::new(640, 480, 2);
        d.fill16(10160);
        d
    }

    #[tokio::test]
    async fn frames_are_processed_in_order() {
        let mut nav = NavPipeline::new(NavConfig::default());
        nav.set_cam(0, CameraRecord::new(0, [0.0, 60.0, 100.0], 0.0, -90.0, 0.0)).unwrap();
        let (svc, handle) = NavService::spawn(nav, 2);
        for k in 1..=3 {
            let frame = FrameSet { depth: vec![(0, floor())], color: Vec::new() };
            let rep = svc.process(frame).await.unwrap();
            assert_eq!(rep.frame, k);
            assert_eq!(rep.sensors, 1);
        }
        svc.shutdown().await;
        let nav = handle.await.unwrap();
        assert!(nav.overhead().map().count_over(0) > 0);
        assert!(matches!(svc.process(FrameSet::default()).await, Err(Error::ServiceClosed)));
    }

    #[tokio::test]
    async fn bad_frame_reports_error() {
        let (svc, _handle) = NavService::spawn(NavPipeline::new(NavConfig::default()), 1);
        let frame = FrameSet { depth: vec![(20, floor())], color: Vec::new() };
        assert!(matches!(svc.process(frame).await, Err(Error::CameraIndex(20))));
    }
}
