//! Host symbol table for relocatable image loading: a sorted
//! `(name, address)` table resolved by binary search, matching
//! `main/symbol_table.c`.

/// A sorted table of exported symbol names the loader can resolve external
/// references against (libc, math, sockets, BadgeVMS APIs).
#[derive(Debug, Clone)]
pub struct SymbolTable {
    entries: Vec<(String, usize)>,
}

impl SymbolTable {
    /// Builds a symbol table from `entries`, sorting them by name so
    /// lookups can binary search.
    pub fn new(entries: impl IntoIterator<Item = (&'static str, usize)>) -> Self {
        let mut entries: Vec<(String, usize)> =
            entries.into_iter().map(|(name, addr)| (name.to_string(), addr)).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Self { entries }
    }

    /// Resolves `name` to its address, if exported.
    pub fn resolve(&self, name: &str) -> Option<usize> {
        self.entries
            .binary_search_by(|(entry, _)| entry.as_str().cmp(name))
            .ok()
            .map(|idx| self.entries[idx].1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_symbols_by_binary_search() {
        let table = SymbolTable::new(vec![("puts", 1), ("malloc", 2), ("free", 3)]);
        assert_eq!(table.resolve("malloc"), Some(2));
        assert_eq!(table.resolve("puts"), Some(1));
    }

    #[test]
    fn unknown_symbol_resolves_to_none() {
        let table = SymbolTable::new(vec![("puts", 1)]);
        assert_eq!(table.resolve("nonexistent"), None);
    }
}
