// ── Circuit map ──
//
// Configured circuits and their human labels, in configuration order.

/// Ordered mapping from daemon circuit identifier to display label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircuitMap {
    entries: Vec<(String, Option<String>)>,
}

impl CircuitMap {
    /// Build from `(circuit, label)` pairs. Later duplicates replace the
    /// label but keep the first position. Empty labels count as unlabeled.
    pub fn new<I, C, L>(entries: I) -> Self
    where
        I: IntoIterator<Item = (C, L)>,
        C: Into<String>,
        L: Into<String>,
    {
        let mut map = Self::default();
        for (circuit, label) in entries {
            map.insert(circuit, Some(label.into()));
        }
        map
    }

    /// Add `circuit` with an optional label.
    pub fn insert(&mut self, circuit: impl Into<String>, label: Option<String>) {
        let circuit = circuit.into();
        let label = label.filter(|l| !l.trim().is_empty());
        match self.entries.iter_mut().find(|(c, _)| *c == circuit) {
            Some((_, existing)) => *existing = label,
            None => self.entries.push((circuit, label)),
        }
    }

    /// Configured circuits, in order.
    pub fn iter_circuits(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(c, _)| c.as_str())
    }

    pub fn contains(&self, circuit: &str) -> bool {
        self.entries.iter().any(|(c, _)| c == circuit)
    }

    /// Configured label for `circuit`, if any.
    pub fn display_name(&self, circuit: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(c, _)| c == circuit)
            .and_then(|(_, label)| label.as_deref())
    }

    /// `"<label>: <title>"`, or just `title` for unlabeled circuits.
    pub fn entity_name(&self, circuit: &str, title: &str) -> String {
        match self.display_name(circuit) {
            Some(label) => format!("{label}: {title}"),
            None => title.to_owned(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
