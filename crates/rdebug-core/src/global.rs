//! # Process-Scoped Engine
//!
//! Optional home for the one engine a host embeds. The host creates it once
//! with [`create`]; the VM backend and host code later reach it with
//! [`get`]. The engine is single-threaded, so the slot is per thread: the
//! thread that runs the VM owns it.

use std::cell::RefCell;
use std::rc::Rc;

use once_cell::unsync::OnceCell;
use tracing::debug;

use crate::debugger::Debugger;

/// Shared handle to the engine.
pub type SharedDebugger = Rc<RefCell<Debugger>>;

thread_local! {
    static ENGINE: OnceCell<SharedDebugger> = const { OnceCell::new() };
}

/// Install `debugger` as this thread's engine.
///
/// Returns the handle, or `None` if an engine was already created (the
/// argument is dropped in that case).
pub fn create(debugger: Debugger) -> Option<SharedDebugger>
{
    ENGINE.with(|slot| {
        let handle = Rc::new(RefCell::new(debugger));
        match slot.set(Rc::clone(&handle)) {
            Ok(()) => {
                debug!("process engine created");
                Some(handle)
            }
            Err(_) => None,
        }
    })
}

/// This thread's engine, if [`create`] was called.
#[must_use]
pub fn get() -> Option<SharedDebugger>
{
    ENGINE.with(|slot| slot.get().cloned())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_create_once()
    {
        std::thread::spawn(|| {
            assert!(get().is_none());
            let first = create(Debugger::new()).unwrap();
            assert!(create(Debugger::new()).is_none());
            assert!(Rc::ptr_eq(&first, &get().unwrap()));
        })
        .join()
        .unwrap();
    }
}
