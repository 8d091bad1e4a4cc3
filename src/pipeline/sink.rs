// Thu Oct 15 2026 - Alex

use crate::pipeline::layout::LayoutRequest;
use crate::rtti::{ClassTypeInfo, VttModel};
use std::sync::Arc;

/// Receives one layout request per accepted class.
pub trait LayoutSink: Send + Sync {
    fn submit(&self, request: LayoutRequest);
}

/// Receives accepted classes for constructor analysis. A `None` VTT means
/// class-only mode.
pub trait ConstructorSink: Send + Sync {
    fn submit(&self, class: Arc<ClassTypeInfo>, vtt: Option<VttModel>);
}
