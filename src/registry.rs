//! Path bookkeeping: an interner for full binding-path strings, a cache
//! over the downstream path atoms, and the action/space capture tables.
//!
//! Binding paths are interned once (at suggest-bindings or config-compile
//! time) so the per-frame tables key on plain integers instead of strings.

use crate::hands::Side;
use openxr_sys as xr;
use std::collections::HashMap;
use std::ffi::CString;
use std::sync::{Arc, RwLock};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct BindingId(u32);

#[derive(Default)]
struct InternerInner {
    names: Vec<Arc<str>>,
    ids: HashMap<Arc<str>, BindingId>,
}

#[derive(Default)]
pub struct PathInterner {
    inner: RwLock<InternerInner>,
}

impl PathInterner {
    pub fn intern(&self, name: &str) -> BindingId {
        if let Some(id) = self.inner.read().unwrap().ids.get(name) {
            return *id;
        }
        let mut inner = self.inner.write().unwrap();
        if let Some(id) = inner.ids.get(name) {
            return *id;
        }
        let id = BindingId(inner.names.len() as u32);
        let name: Arc<str> = name.into();
        inner.names.push(name.clone());
        inner.ids.insert(name, id);
        id
    }

    pub fn name(&self, id: BindingId) -> Arc<str> {
        self.inner.read().unwrap().names[id.0 as usize].clone()
    }
}

/// String translation for the runtime's opaque path atoms, memoized per
/// atom so repeated lookups skip the downstream call.
pub struct PathCache {
    instance: xr::Instance,
    string_to_path: xr::pfn::StringToPath,
    path_to_string: xr::pfn::PathToString,
    strings: RwLock<HashMap<xr::Path, Arc<str>>>,
}

impl PathCache {
    pub fn new(
        instance: xr::Instance,
        string_to_path: xr::pfn::StringToPath,
        path_to_string: xr::pfn::PathToString,
    ) -> Self {
        Self {
            instance,
            string_to_path,
            path_to_string,
            strings: Default::default(),
        }
    }

    pub fn path(&self, s: &str) -> Option<xr::Path> {
        let c = CString::new(s).ok()?;
        let mut path = xr::Path::NULL;
        let res = unsafe { (self.string_to_path)(self.instance, c.as_ptr(), &mut path) };
        (res == xr::Result::SUCCESS).then_some(path)
    }

    pub fn string(&self, path: xr::Path) -> Option<Arc<str>> {
        if path == xr::Path::NULL {
            return None;
        }
        if let Some(s) = self.strings.read().unwrap().get(&path) {
            return Some(s.clone());
        }
        let mut buf = [0u8; xr::MAX_PATH_LENGTH];
        let mut len = 0u32;
        let res = unsafe {
            (self.path_to_string)(
                self.instance,
                path,
                buf.len() as u32,
                &mut len,
                buf.as_mut_ptr() as *mut _,
            )
        };
        if res != xr::Result::SUCCESS || len == 0 {
            return None;
        }
        let s: Arc<str> = std::str::from_utf8(&buf[..len as usize - 1]).ok()?.into();
        self.strings.write().unwrap().insert(path, s.clone());
        Some(s)
    }
}

/// Bindings the application suggested for an action under our emulated
/// profile, in suggestion order. Lookup with a null sub-action path returns
/// the first entry.
#[derive(Default)]
pub struct ActionRegistry {
    bindings: HashMap<xr::Action, Vec<BindingId>>,
}

impl ActionRegistry {
    pub fn record(&mut self, action: xr::Action, binding: BindingId) {
        self.bindings.entry(action).or_default().push(binding);
    }

    pub fn resolve(
        &self,
        action: xr::Action,
        subaction_prefix: Option<&str>,
        interner: &PathInterner,
    ) -> Option<BindingId> {
        let ids = self.bindings.get(&action)?;
        match subaction_prefix {
            None => ids.first().copied(),
            Some(prefix) => ids
                .iter()
                .copied()
                .find(|id| interner.name(*id).starts_with(prefix)),
        }
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PoseKind {
    Grip,
    Aim,
}

/// An action space created on a hand binding path.
#[derive(Copy, Clone)]
pub struct SpaceEntry {
    pub binding: BindingId,
    pub side: Side,
    /// Set when the binding path names a grip or aim pose; anything else is
    /// remembered but never synthesized.
    pub kind: Option<PoseKind>,
    pub pose_in_action_space: xr::Posef,
}

#[derive(Default)]
pub struct SpaceRegistry {
    spaces: HashMap<xr::Space, SpaceEntry>,
}

impl SpaceRegistry {
    pub fn insert(&mut self, space: xr::Space, entry: SpaceEntry) {
        self.spaces.insert(space, entry);
    }

    pub fn remove(&mut self, space: xr::Space) {
        self.spaces.remove(&space);
    }

    pub fn get(&self, space: xr::Space) -> Option<SpaceEntry> {
        self.spaces.get(&space).copied()
    }

    pub fn clear(&mut self) {
        self.spaces.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interner_reuses_ids() {
        let interner = PathInterner::default();
        let a = interner.intern("/user/hand/left/input/trigger/value");
        let b = interner.intern("/user/hand/left/input/trigger/value");
        let c = interner.intern("/user/hand/right/input/trigger/value");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(&*interner.name(a), "/user/hand/left/input/trigger/value");
    }

    #[test]
    fn action_lookup_honors_suggestion_order_and_subaction() {
        let interner = PathInterner::default();
        let mut registry = ActionRegistry::default();
        let action = xr::Action::from_raw(7);
        let right = interner.intern("/user/hand/right/input/squeeze/value");
        let left = interner.intern("/user/hand/left/input/squeeze/value");
        registry.record(action, right);
        registry.record(action, left);

        assert_eq!(registry.resolve(action, None, &interner), Some(right));
        assert_eq!(
            registry.resolve(action, Some("/user/hand/left"), &interner),
            Some(left)
        );
        assert_eq!(
            registry.resolve(action, Some("/user/gamepad"), &interner),
            None
        );
        assert_eq!(
            registry.resolve(xr::Action::from_raw(8), None, &interner),
            None
        );
    }
}
