use std::collections::HashSet;

/// Hands out identifiers that collide with neither each other nor a set of
/// reserved words.
#[derive(Clone, Debug, Default)]
pub struct Namer {
    used: HashSet<String>,
}

impl Namer {
    /// Creates a namer with `reserved` already taken.
    pub fn new<'a>(reserved: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            used: reserved.into_iter().map(str::to_string).collect(),
        }
    }

    /// Marks `name` as taken.
    pub fn reserve(&mut self, name: impl Into<String>) {
        self.used.insert(name.into());
    }

    /// Returns `true` if `name` is taken.
    pub fn is_used(&self, name: &str) -> bool {
        self.used.contains(name)
    }

    /// Returns `base` if it is free, otherwise `base_1`, `base_2`, and so
    /// on. The returned name is taken from then on.
    pub fn unique(&mut self, base: &str) -> String {
        let name = if self.used.contains(base) {
            (1..)
                .map(|i| format!("{base}_{i}"))
                .find(|candidate| !self.used.contains(candidate))
                .unwrap_or_else(|| base.to_string())
        } else {
            base.to_string()
        };
        self.used.insert(name.clone());
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        let mut namer = Namer::new(["float", "tint_mod"]);
        assert_eq!(namer.unique("tint_div"), "tint_div");
        assert_eq!(namer.unique("tint_div"), "tint_div_1");
        assert_eq!(namer.unique("tint_mod"), "tint_mod_1");
        assert_eq!(namer.unique("float"), "float_1");
        assert!(namer.is_used("tint_div_1"));
        namer.reserve("x");
        assert_eq!(namer.unique("x"), "x_1");
    }
}
