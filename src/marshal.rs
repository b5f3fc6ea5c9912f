//! Ruby Marshal 4.8 encoder for dependency API payloads.
//!
//! Bundler loads `/api/v1/dependencies` responses with `Marshal.load`, so the
//! binary encoding has to be real Marshal: an array of symbol-keyed hashes.
//! Only the subset needed for that shape is implemented (UTF-8 strings,
//! symbols, arrays and hashes).

use std::collections::HashMap;

use crate::dependencies::DependencySpec;

const MAJOR: u8 = 4;
const MINOR: u8 = 8;

/// A Ruby value that can be written with [`Encoder`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Symbol(String),
    Array(Vec<Value>),
    Hash(Vec<(Value, Value)>),
}

impl From<&DependencySpec> for Value {
    fn from(spec: &DependencySpec) -> Self {
        let requirements = spec
            .dependencies
            .iter()
            .map(|(name, requirement)| {
                Value::Array(vec![
                    Value::Str(name.clone()),
                    Value::Str(requirement.clone()),
                ])
            })
            .collect();

        Value::Hash(vec![
            (Value::Symbol("name".into()), Value::Str(spec.name.clone())),
            (
                Value::Symbol("number".into()),
                Value::Str(spec.number.clone()),
            ),
            (
                Value::Symbol("platform".into()),
                Value::Str(spec.platform.clone()),
            ),
            (
                Value::Symbol("dependencies".into()),
                Value::Array(requirements),
            ),
        ])
    }
}

/// Streaming Marshal writer. Symbols are written once and back-referenced
/// afterwards, exactly as `Marshal.dump` does.
pub struct Encoder {
    buf: Vec<u8>,
    symbols: HashMap<String, usize>,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: vec![MAJOR, MINOR],
            symbols: HashMap::new(),
        }
    }

    pub fn write(&mut self, value: &Value) {
        match value {
            Value::Str(s) => {
                // UTF-8 strings carry one ivar: `E => true`
                self.buf.push(b'I');
                self.buf.push(b'"');
                self.write_bytes(s.as_bytes());
                self.write_len(1);
                self.write_symbol("E");
                self.buf.push(b'T');
            }
            Value::Symbol(name) => self.write_symbol(name),
            Value::Array(items) => {
                self.buf.push(b'[');
                self.write_len(items.len());
                for item in items {
                    self.write(item);
                }
            }
            Value::Hash(pairs) => {
                self.buf.push(b'{');
                self.write_len(pairs.len());
                for (key, val) in pairs {
                    self.write(key);
                    self.write(val);
                }
            }
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    fn write_symbol(&mut self, name: &str) {
        if let Some(&index) = self.symbols.get(name) {
            self.buf.push(b';');
            self.write_len(index);
            return;
        }
        let index = self.symbols.len();
        self.symbols.insert(name.to_string(), index);
        self.buf.push(b':');
        self.write_bytes(name.as_bytes());
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_len(bytes.len());
        self.buf.extend_from_slice(bytes);
    }

    /// Marshal's packed long, for the non-negative values used as lengths
    /// and symbol indexes: 0 is `0x00`, 1..=122 is `n + 5`, larger values are
    /// a byte count followed by little-endian bytes.
    fn write_len(&mut self, n: usize) {
        match n {
            0 => self.buf.push(0),
            1..=122 => self.buf.push((n + 5) as u8),
            _ => {
                let bytes = (n as u64).to_le_bytes();
                let len = bytes.iter().rposition(|&b| b != 0).map_or(1, |i| i + 1);
                self.buf.push(len as u8);
                self.buf.extend_from_slice(&bytes[..len]);
            }
        }
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Dumps a value as a complete Marshal stream (version header included).
pub fn dump(value: &Value) -> Vec<u8> {
    let mut encoder = Encoder::new();
    encoder.write(value);
    encoder.finish()
}

/// Dumps dependency records the way the RubyGems dependency API does.
pub fn dump_dependencies(specs: &[DependencySpec]) -> Vec<u8> {
    dump(&Value::Array(specs.iter().map(Value::from).collect()))
}
