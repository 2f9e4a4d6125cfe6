use std::collections::BTreeMap;
use std::ffi::CString;

/// The shell's variable store. Child processes receive a snapshot of it.
#[derive(Debug, Clone, Default)]
pub struct Environ {
    vars: BTreeMap<String, String>,
}

impl Environ {
    /// Seeds the store from the shell's own process environment.
    /// Variables that are not valid UTF-8 are left out.
    pub fn from_process() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Environ { vars }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.vars.insert(name.to_string(), value.to_string());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.vars.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Flat `NAME=value` list for exec. Entries holding a NUL byte are skipped.
    pub fn envp(&self) -> Vec<CString> {
        self.vars
            .iter()
            .filter_map(|(k, v)| CString::new(format!("{}={}", k, v)).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let mut env = Environ::default();
        assert!(!env.contains("FOO"));
        env.set("FOO", "bar");
        assert_eq!(env.get("FOO"), Some("bar"));
        env.set("FOO", "baz");
        assert_eq!(env.get("FOO"), Some("baz"));
        assert_eq!(env.remove("FOO").as_deref(), Some("baz"));
        assert_eq!(env.get("FOO"), None);
    }

    #[test]
    fn test_envp_is_sorted_name_value_pairs() {
        let mut env = Environ::default();
        env.set("B", "2");
        env.set("A", "1 one");
        let envp: Vec<String> = env
            .envp()
            .into_iter()
            .map(|c| c.into_string().unwrap())
            .collect();
        assert_eq!(envp, vec!["A=1 one", "B=2"]);
    }

    #[test]
    fn test_from_process_sees_path() {
        let env = Environ::from_process();
        assert_eq!(env.get("PATH").map(str::to_string), std::env::var("PATH").ok());
    }
}
