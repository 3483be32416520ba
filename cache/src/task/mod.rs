//! Background threads owned by sections and registries: the notifier that
//! delivers completion callbacks and the periodic sweeper.

pub(crate) mod notifier;
pub(crate) mod sweeper;
