use std::collections::HashMap;
use std::env;

/// Ordered, de-duplicated set of upstream keys for one inbound request.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialPool {
    keys: Vec<String>,
}

impl std::fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPool")
            .field(
                "keys",
                &self.keys.iter().map(|k| redact_key(k)).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl CredentialPool {
    /// Keeps slot order, drops unset/blank slots and repeats of an earlier key.
    pub fn from_slots<I, S>(slots: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        let mut keys: Vec<String> = Vec::new();
        for slot in slots.into_iter().flatten() {
            let key = slot.as_ref().trim();
            if key.is_empty() || keys.iter().any(|k| k == key) {
                continue;
            }
            keys.push(key.to_string());
        }
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.keys.get(index).map(String::as_str)
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

/// Where the gateway gets its keys from. Called once per inbound request; the
/// returned pool is never cached across requests.
pub trait KeySource: Send + Sync {
    fn load(&self) -> CredentialPool;
}

/// Numbered environment slots (`GEMINI_KEY_1..=N`) plus optional inline keys.
#[derive(Debug, Clone)]
pub struct EnvKeySource {
    prefix: String,
    slots: usize,
    inline: Vec<String>,
}

impl EnvKeySource {
    pub fn new(prefix: impl Into<String>, slots: usize, inline: Vec<String>) -> Self {
        Self {
            prefix: prefix.into(),
            slots,
            inline,
        }
    }

    pub fn slot_names(&self) -> Vec<String> {
        (1..=self.slots)
            .map(|i| format!("{}{}", self.prefix, i))
            .collect()
    }

    /// Per-slot view for `keys` listing: `(name, value)`.
    pub fn inspect(&self) -> Vec<(String, Option<String>)> {
        self.slot_names()
            .into_iter()
            .map(|name| {
                let value = env::var(&name).ok().filter(|v| !v.trim().is_empty());
                (name, value)
            })
            .collect()
    }
}

impl KeySource for EnvKeySource {
    fn load(&self) -> CredentialPool {
        let from_env = self.slot_names().into_iter().map(|name| env::var(name).ok());
        let inline = self.inline.iter().cloned().map(Some);
        CredentialPool::from_slots(from_env.chain(inline))
    }
}

/// Slots looked up in a per-invocation binding map instead of the process
/// environment, as edge runtimes hand secrets to each request.
#[derive(Debug, Clone)]
pub struct BindingKeySource {
    pool: CredentialPool,
}

impl BindingKeySource {
    pub fn new(bindings: &HashMap<String, String>, prefix: &str, slots: usize) -> Self {
        let pool = CredentialPool::from_slots(
            (1..=slots).map(|i| bindings.get(&format!("{prefix}{i}")).map(String::as_str)),
        );
        Self { pool }
    }
}

impl KeySource for BindingKeySource {
    fn load(&self) -> CredentialPool {
        self.pool.clone()
    }
}

/// Fixed key list; used by tests and by callers that resolve keys themselves.
#[derive(Debug, Clone, Default)]
pub struct StaticKeySource {
    keys: Vec<String>,
}

impl StaticKeySource {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl KeySource for StaticKeySource {
    fn load(&self) -> CredentialPool {
        CredentialPool::from_slots(self.keys.iter().map(Some))
    }
}

/// `AIza…wF0`-style short form; short keys are fully masked.
pub fn redact_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 10 {
        return "*".repeat(chars.len().max(3));
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{head}…{tail}")
}
