//! Registry state: advertised globals and bind-version selection.

use log::{debug, warn};

/// A capability advertised by the compositor during registry
/// enumeration.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GlobalEntry {
    /// Compositor-assigned numeric name, unique for the connection.
    pub name: u32,
    /// Interface identifier, e.g. `"wl_seat"`.
    pub interface: String,
    /// Highest version the compositor supports.
    pub version: u32,
}

/// The set of globals currently advertised on the connection.
#[derive(Debug, Default)]
pub struct GlobalTable {
    entries: Vec<GlobalEntry>,
    defunct: Vec<String>,
}

impl GlobalTable {
    pub fn new() -> GlobalTable {
        GlobalTable { entries: Vec::new(), defunct: Vec::new() }
    }

    pub fn announce(&mut self, name: u32, interface: String, version: u32) {
        debug!("global {}@{} (name {})", interface, version, name);
        self.entries.push(GlobalEntry { name, interface, version });
    }

    /// Handle a `global_remove` notification. `bound` tells whether the
    /// withdrawn interface backs a proxy this session already bound; a
    /// bound proxy is left pointing at the defunct global (it keeps
    /// working until the connection ends), which is recorded and warned
    /// about rather than silently ignored.
    pub fn withdraw(&mut self, name: u32, bound: bool) -> Option<GlobalEntry> {
        let index = self.entries.iter().position(|e| e.name == name)?;
        let entry = self.entries.swap_remove(index);
        if bound {
            warn!(
                "compositor withdrew {} (name {}) which is bound; the proxy is now defunct",
                entry.interface, entry.name
            );
            self.defunct.push(entry.interface.clone());
        } else {
            debug!("global {} (name {}) withdrawn", entry.interface, entry.name);
        }
        Some(entry)
    }

    /// First advertised entry for `interface`, if any.
    pub fn get(&self, interface: &str) -> Option<&GlobalEntry> {
        self.entries.iter().find(|e| e.interface == interface)
    }

    /// Pick the version to bind `interface` at: the advertised version
    /// clamped to what this client implements. `None` when the global
    /// is absent.
    pub fn bind_version(&self, interface: &str, supported: u32) -> Option<(u32, u32)> {
        self.get(interface).map(|e| (e.name, e.version.min(supported)))
    }

    /// Every global currently advertised.
    pub fn entries(&self) -> &[GlobalEntry] {
        &self.entries
    }

    /// Interfaces whose backing global was withdrawn after binding.
    pub fn defunct(&self) -> &[String] {
        &self.defunct
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_version_clamps_to_supported() {
        let mut table = GlobalTable::new();
        table.announce(1, "wl_seat".into(), 9);
        table.announce(2, "wl_compositor".into(), 3);
        assert_eq!(table.bind_version("wl_seat", 5), Some((1, 5)));
        assert_eq!(table.bind_version("wl_compositor", 4), Some((2, 3)));
        assert_eq!(table.bind_version("xdg_wm_base", 1), None);
    }

    #[test]
    fn withdrawal_of_bound_global_is_recorded() {
        let mut table = GlobalTable::new();
        table.announce(7, "wl_seat".into(), 5);
        table.announce(8, "wl_output".into(), 3);
        let gone = table.withdraw(7, true).expect("entry exists");
        assert_eq!(gone.interface, "wl_seat");
        assert!(table.get("wl_seat").is_none());
        assert_eq!(table.defunct(), ["wl_seat".to_string()]);
        // unknown names are tolerated
        assert!(table.withdraw(99, false).is_none());
    }
}
