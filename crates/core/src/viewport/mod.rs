//! Live preview with superseding requests.
//!
//! Every request is stamped with a generation number. Renders run on their own
//! buffer and check the generation between tiles, so a newer request cancels
//! older work. A finished frame replaces the displayed one only while its
//! generation is still the latest.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::{
    environment::EnvironmentMap,
    render::{FrameRenderer, RenderMode, RenderTarget},
    scene::Scene,
    Result,
};

/// What the viewport was asked to show.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportRequest {
    pub scene: Scene,
    pub time: f64,
}

/// Receipt for a request; only the newest ticket may commit a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ticket {
    generation: u64,
    request: ViewportRequest,
}

impl Ticket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn request(&self) -> &ViewportRequest {
        &self.request
    }
}

/// The frame currently on display.
#[derive(Debug)]
pub struct DisplayedFrame {
    pub generation: u64,
    pub request: ViewportRequest,
    pub target: RenderTarget,
}

struct Inner {
    renderer: FrameRenderer,
    environment: Arc<dyn EnvironmentMap>,
    generation: AtomicU64,
    last_request: Mutex<Option<ViewportRequest>>,
    displayed: RwLock<Option<Arc<DisplayedFrame>>>,
}

/// Cheaply cloneable handle to a live viewport.
#[derive(Clone)]
pub struct Viewport {
    inner: Arc<Inner>,
}

impl Viewport {
    pub fn new(renderer: FrameRenderer, environment: Arc<dyn EnvironmentMap>) -> Self {
        Self {
            inner: Arc::new(Inner {
                renderer,
                environment,
                generation: AtomicU64::new(0),
                last_request: Mutex::new(None),
                displayed: RwLock::new(None),
            }),
        }
    }

    /// Generation of the most recent request.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Stamps a new request. Returns `None` when it is identical to the
    /// previous one, which is then left to finish undisturbed.
    pub fn request(&self, scene: Scene, time: f64) -> Option<Ticket> {
        let request = ViewportRequest { scene, time };
        let mut last = self.inner.last_request.lock();
        if last.as_ref() == Some(&request) {
            debug!(time, "viewport request unchanged");
            return None;
        }
        *last = Some(request);

        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        Some(Ticket {
            generation,
            request,
        })
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        ticket.generation == self.generation()
    }

    /// Renders `ticket` on the calling thread. Returns whether the frame was
    /// committed; superseded work is abandoned without touching the display.
    pub fn render(&self, ticket: &Ticket) -> Result<bool> {
        let request = &ticket.request;
        let rendered = self.inner.renderer.render_cancellable(
            RenderMode::Viewport,
            &request.scene,
            request.time,
            self.inner.environment.as_ref(),
            &|| !self.is_current(ticket),
        )?;

        match rendered {
            Some(target) => Ok(self.commit(ticket, target)),
            None => {
                debug!(generation = ticket.generation, "viewport frame superseded");
                Ok(false)
            }
        }
    }

    /// Validates and stamps a request, then renders it on a background
    /// thread. Invalid scenes are rejected here, before any work is queued.
    pub fn submit(&self, scene: Scene, time: f64) -> Result<Option<JoinHandle<Result<bool>>>> {
        scene.validate()?;
        let Some(ticket) = self.request(scene, time) else {
            return Ok(None);
        };

        let viewport = self.clone();
        Ok(Some(thread::spawn(move || viewport.render(&ticket))))
    }

    /// Publishes `target` if `ticket` is still the newest request.
    pub fn commit(&self, ticket: &Ticket, target: RenderTarget) -> bool {
        let mut displayed = self.inner.displayed.write();
        if !self.is_current(ticket) {
            warn!(
                generation = ticket.generation,
                latest = self.generation(),
                "discarding stale viewport frame"
            );
            return false;
        }

        *displayed = Some(Arc::new(DisplayedFrame {
            generation: ticket.generation,
            request: ticket.request,
            target,
        }));
        true
    }

    /// The frame on display, if any has been committed yet.
    pub fn displayed(&self) -> Option<Arc<DisplayedFrame>> {
        self.inner.displayed.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        camera::{CameraDescriptor, Resolution},
        environment::CheckerEnvironment,
        geodesic::IntegratorSettings,
        render::{QualityProfile, RenderConfig},
    };

    fn viewport() -> Viewport {
        let config = RenderConfig {
            viewport: QualityProfile {
                integrator: IntegratorSettings::interactive(),
                resolution_scale: 0.5,
                ..QualityProfile::viewport()
            },
            ..RenderConfig::default()
        };
        let renderer = FrameRenderer::new(config).unwrap();
        Viewport::new(renderer, Arc::new(CheckerEnvironment::default()))
    }

    fn scene() -> Scene {
        Scene {
            camera: CameraDescriptor::perspective(70.0, Resolution::new(16, 16)),
            ..Scene::default()
        }
    }

    #[test]
    fn submitted_frame_is_displayed() {
        let viewport = viewport();
        let handle = viewport.submit(scene(), 0.0).unwrap().unwrap();

        assert!(handle.join().unwrap().unwrap());
        let shown = viewport.displayed().unwrap();
        assert_eq!(shown.generation, 1);
        assert_eq!(shown.target.resolution(), Resolution::new(8, 8));
    }

    #[test]
    fn identical_requests_are_not_rerendered() {
        let viewport = viewport();
        assert!(viewport.request(scene(), 2.0).is_some());
        assert!(viewport.request(scene(), 2.0).is_none());
        assert!(viewport.request(scene(), 2.5).is_some());
        assert_eq!(viewport.generation(), 2);
    }

    #[test]
    fn superseded_work_never_reaches_the_display() {
        let viewport = viewport();
        let first = viewport.request(scene(), 0.0).unwrap();
        let second = viewport.request(scene(), 1.0).unwrap();

        assert!(!viewport.render(&first).unwrap());
        assert!(viewport.displayed().is_none());

        assert!(viewport.render(&second).unwrap());
        assert_eq!(viewport.displayed().unwrap().request.time, 1.0);
    }

    #[test]
    fn stale_completion_is_discarded() {
        let viewport = viewport();
        let old = viewport.request(scene(), 0.0).unwrap();
        assert!(viewport.render(&old).unwrap());
        let shown = viewport.displayed().unwrap();

        let stale = viewport.request(scene(), 3.0).unwrap();
        let target = shown.target.clone();
        viewport.request(scene(), 4.0).unwrap();

        assert!(!viewport.commit(&stale, target));
        // The frame on display is untouched.
        assert!(Arc::ptr_eq(&shown, &viewport.displayed().unwrap()));
    }

    #[test]
    fn invalid_scene_is_rejected_up_front() {
        let viewport = viewport();
        let broken = Scene {
            mass: 0.0,
            ..scene()
        };
        assert!(viewport.submit(broken, 0.0).is_err());
        assert_eq!(viewport.generation(), 0);
    }
}
