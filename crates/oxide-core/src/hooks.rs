// crates/oxide-core/src/hooks.rs
use std::collections::HashMap;
use thiserror::Error;

/// Callback run just before the instruction at `addr` executes.
pub type HookFn<R> = Box<dyn FnMut(u32, &mut R)>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HookError {
    #[error("a hook is already registered at {0:#X}")]
    AlreadyRegistered(u32),
}

/// Tabla de hooks por dirección. Como máximo uno por dirección: registrar
/// sobre una dirección ocupada se rechaza y deja el hook existente intacto.
pub struct HookTable<R> {
    hooks: HashMap<u32, HookFn<R>>,
}

impl<R> Default for HookTable<R> {
    fn default() -> Self {
        Self {
            hooks: HashMap::new(),
        }
    }
}

impl<R> HookTable<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, addr: u32, hook: HookFn<R>) -> Result<(), HookError> {
        if self.hooks.contains_key(&addr) {
            return Err(HookError::AlreadyRegistered(addr));
        }
        self.hooks.insert(addr, hook);
        Ok(())
    }

    pub fn unregister(&mut self, addr: u32) -> bool {
        self.hooks.remove(&addr).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Runs the hook at `addr`, if any. Returns whether one ran.
    pub fn dispatch(&mut self, addr: u32, regs: &mut R) -> bool {
        match self.hooks.get_mut(&addr) {
            Some(hook) => {
                log::trace!("hook at {addr:#X}");
                hook(addr, regs);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_registration_is_rejected() {
        let mut table: HookTable<u32> = HookTable::new();
        table.register(0x100, Box::new(|_, r| *r += 1)).unwrap();
        assert_eq!(
            table.register(0x100, Box::new(|_, r| *r += 100)),
            Err(HookError::AlreadyRegistered(0x100))
        );
        let mut regs = 0;
        assert!(table.dispatch(0x100, &mut regs));
        assert_eq!(regs, 1);
        assert!(!table.dispatch(0x102, &mut regs));
        assert!(table.unregister(0x100));
        assert!(table.is_empty());
    }
}
