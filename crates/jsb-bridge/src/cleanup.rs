//! Teardown coordination
//!
//! At engine cleanup the host is disposed before the registry is touched.
//! The sweep then releases every binding with the wrappers already marked
//! cleaned up, so none of them calls into the dead host or back into the
//! table being swept.

use std::rc::Rc;

use tracing::info;

use crate::engine::ScriptEngine;
use crate::registry;

/// Register the registry sweep as an after-cleanup hook of `engine`
pub(crate) fn install(engine: &Rc<ScriptEngine>) {
    engine.add_after_cleanup_hook(|| {
        let released = sweep_registries();
        info!("teardown released {} bound objects", released);
    });
}

/// Release every registered wrapper and clear the registries
///
/// Returns how many wrappers were released.
pub fn sweep_registries() -> usize {
    registry::sweep()
}
