use std::sync::Arc;

use crate::{
    animation::AnimationEngine, deps::KeyInjector, macros::MacroRunner,
    notification::EventBroadcaster, repeater::Repeater, surface::Surface,
};

/// Groups long-lived engine services to reduce top-level `Engine` fields
/// and make dependencies explicit at construction sites.
#[derive(Clone)]
pub(crate) struct Services {
    pub injector: Arc<dyn KeyInjector>,
    pub events: EventBroadcaster,
    pub repeater: Repeater,
    pub macros: MacroRunner,
    pub animations: AnimationEngine,
    pub surface: Surface,
}
