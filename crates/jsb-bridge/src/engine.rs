//! Script engine lifecycle and phase tracking
//!
//! One [`ScriptEngine`] runs per thread. It owns the host runtime, follows
//! the host's collection passes and drives teardown. Every operation that
//! could release host protection consults [`ScriptEngine::phase`] first.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use jsb_host::{CollectionEvent, HostRuntime, RawValue};
use tracing::{debug, info, trace};

use crate::cleanup;
use crate::config::EngineConfig;
use crate::error::{JsbError, JsbResult};
use crate::object::Object;

thread_local! {
    static CURRENT: RefCell<Option<Rc<ScriptEngine>>> = const { RefCell::new(None) };
}

/// Phase of the engine, consulted before releasing host protection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// Host calls are safe
    Normal,
    /// The host is running a collection pass
    Collecting,
    /// The engine is being torn down; terminal
    TearingDown,
}

type CleanupHook = Box<dyn FnOnce()>;

/// The per-thread bridge engine
pub struct ScriptEngine {
    host: Rc<dyn HostRuntime>,
    config: EngineConfig,
    phase: Cell<EnginePhase>,
    before_cleanup: RefCell<Vec<CleanupHook>>,
    after_cleanup: RefCell<Vec<CleanupHook>>,
    global: RefCell<Option<Object>>,
}

impl ScriptEngine {
    /// Start the engine for this thread on top of `host`
    pub fn init(host: Rc<dyn HostRuntime>, config: EngineConfig) -> JsbResult<Rc<Self>> {
        if CURRENT.with(|current| current.borrow().is_some()) {
            return Err(JsbError::EngineAlreadyRunning);
        }
        if !host.is_valid() {
            return Err(JsbError::EngineNotRunning);
        }

        let engine = Rc::new(Self {
            host,
            config,
            phase: Cell::new(EnginePhase::Normal),
            before_cleanup: RefCell::new(Vec::new()),
            after_cleanup: RefCell::new(Vec::new()),
            global: RefCell::new(None),
        });

        let weak = Rc::downgrade(&engine);
        engine
            .host
            .set_collection_observer(Some(Box::new(move |event: CollectionEvent| {
                if let Some(engine) = weak.upgrade() {
                    engine.on_collection(event);
                }
            })));

        cleanup::install(&engine);

        let global = Object::wrap(engine.clone(), engine.host.global_object()?, None);
        if engine.config.root_global {
            global.root();
        }
        *engine.global.borrow_mut() = Some(global);

        CURRENT.with(|current| *current.borrow_mut() = Some(engine.clone()));
        debug!("script engine started");
        Ok(engine)
    }

    /// Engine running on this thread
    pub fn current() -> Option<Rc<Self>> {
        CURRENT
            .try_with(|current| current.borrow().clone())
            .ok()
            .flatten()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase.get()
    }

    pub fn is_in_cleanup(&self) -> bool {
        self.phase.get() == EnginePhase::TearingDown
    }

    pub fn is_garbage_collecting(&self) -> bool {
        self.phase.get() == EnginePhase::Collecting
    }

    /// Whether host protection may be released right now
    pub fn can_release_roots(&self) -> bool {
        self.phase.get() == EnginePhase::Normal
    }

    /// Whether the engine still services host calls
    pub fn is_running(&self) -> bool {
        !self.is_in_cleanup() && self.host.is_valid()
    }

    /// The host while it accepts calls
    ///
    /// Stays usable through the before-cleanup hooks; only the host's
    /// disposal cuts it off.
    pub(crate) fn live_host(&self) -> JsbResult<&dyn HostRuntime> {
        if self.host.is_valid() {
            Ok(&*self.host)
        } else {
            Err(JsbError::EngineNotRunning)
        }
    }

    /// The wrapped global object; `None` after cleanup
    pub fn global_object(&self) -> Option<Object> {
        self.global.borrow().clone()
    }

    /// Run `hook` at the start of [`cleanup`](Self::cleanup), while the host is alive
    pub fn add_before_cleanup_hook(&self, hook: impl FnOnce() + 'static) {
        self.before_cleanup.borrow_mut().push(Box::new(hook));
    }

    /// Run `hook` at the end of [`cleanup`](Self::cleanup), after the host is disposed
    pub fn add_after_cleanup_hook(&self, hook: impl FnOnce() + 'static) {
        self.after_cleanup.borrow_mut().push(Box::new(hook));
    }

    /// Ask the host for a full collection pass
    pub fn garbage_collect(&self) {
        if self.is_running() {
            trace!("garbage collection requested");
            self.host.collect_garbage();
        }
    }

    /// Clear the pending host exception and describe it
    pub fn clear_exception(&self) -> Option<JsbError> {
        if !self.host.is_valid() {
            return None;
        }
        let thrown = self.host.clear_exception()?;
        let error = self.describe_exception(&thrown);
        debug!("cleared pending exception: {}", error);
        Some(error)
    }

    fn describe_exception(&self, thrown: &RawValue) -> JsbError {
        let text = |name: &str| -> Option<String> {
            let object = thrown.as_object()?;
            match self.host.get_property(object, name) {
                Ok(RawValue::String(s)) => Some(s),
                _ => None,
            }
        };

        if let Some(message) = text("message") {
            return JsbError::Script {
                error_type: text("name").unwrap_or_else(|| "Error".to_string()),
                message,
                stack: text("stack"),
            };
        }

        let message = self
            .host
            .to_display_string(thrown)
            .unwrap_or_else(|err| err.to_string());
        JsbError::script_error("Error", message)
    }

    /// `JSON.<name>` from the global object
    ///
    /// Returns the `JSON` object alongside, as the receiver for the call.
    pub(crate) fn json_function(&self, name: &str) -> JsbResult<(Object, Object)> {
        let global = self.global_object().ok_or(JsbError::EngineNotRunning)?;
        let json = global
            .get_property("JSON")?
            .and_then(crate::Value::into_object)
            .ok_or_else(|| JsbError::MissingCapability("JSON".to_string()))?;
        let function = json
            .get_property(name)?
            .and_then(crate::Value::into_object)
            .filter(Object::is_function)
            .ok_or_else(|| JsbError::MissingCapability(format!("JSON.{}", name)))?;
        Ok((json, function))
    }

    /// Tear the engine down
    ///
    /// Runs the before hooks, releases the global object, disposes the host,
    /// then runs the after hooks (the registry sweep among them). Idempotent.
    pub fn cleanup(&self) {
        if self.phase.replace(EnginePhase::TearingDown) == EnginePhase::TearingDown {
            return;
        }
        info!("script engine cleanup begin");

        let hooks = std::mem::take(&mut *self.before_cleanup.borrow_mut());
        for hook in hooks {
            hook();
        }

        let global = self.global.borrow_mut().take();
        drop(global);

        self.host.set_collection_observer(None);
        self.host.dispose();

        let hooks = std::mem::take(&mut *self.after_cleanup.borrow_mut());
        for hook in hooks {
            hook();
        }

        let uninstalled = CURRENT
            .try_with(|current| {
                let mut current = current.borrow_mut();
                match current.as_ref() {
                    Some(engine) if std::ptr::eq(Rc::as_ptr(engine), self) => current.take(),
                    _ => None,
                }
            })
            .ok()
            .flatten();
        drop(uninstalled);

        info!("script engine cleanup end");
    }

    fn on_collection(&self, event: CollectionEvent) {
        let next = match (self.phase.get(), event) {
            (EnginePhase::Normal, CollectionEvent::Begin) => EnginePhase::Collecting,
            (EnginePhase::Collecting, CollectionEvent::End) => EnginePhase::Normal,
            (phase, _) => phase,
        };
        trace!("collection {:?}: {:?} -> {:?}", event, self.phase.get(), next);
        self.phase.set(next);
    }
}

impl fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("phase", &self.phase.get())
            .field("config", &self.config)
            .finish()
    }
}
