use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::crs::Crs;
use crate::error::ProcessingError;
use crate::layer::VectorLayer;

/// Where an algorithm puts one of its layer outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sink {
    /// Keep in memory, optionally renaming the layer.
    Memory(Option<String>),
    /// Write to a GeoJSON file.
    File(PathBuf),
}

impl Sink {
    pub fn memory() -> Self {
        Sink::Memory(None)
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Sink::File(path.into())
    }

    /// `memory:` and `memory:Name` stay in memory, anything else is a path.
    pub fn parse(value: &str) -> Self {
        match value.strip_prefix("memory:") {
            Some("") => Sink::Memory(None),
            Some(name) => Sink::Memory(Some(name.to_string())),
            None => Sink::File(PathBuf::from(value)),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ParameterValue {
    Layer(Arc<VectorLayer>),
    Crs(Crs),
    Number(f64),
    Integer(i64),
    Bool(bool),
    Text(String),
    Fields(Vec<String>),
    Sink(Sink),
    Null,
}

impl From<VectorLayer> for ParameterValue {
    fn from(layer: VectorLayer) -> Self {
        ParameterValue::Layer(Arc::new(layer))
    }
}

impl From<Arc<VectorLayer>> for ParameterValue {
    fn from(layer: Arc<VectorLayer>) -> Self {
        ParameterValue::Layer(layer)
    }
}

impl From<Crs> for ParameterValue {
    fn from(crs: Crs) -> Self {
        ParameterValue::Crs(crs)
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        ParameterValue::Number(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        ParameterValue::Integer(value)
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        ParameterValue::Bool(value)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::Text(value.to_string())
    }
}

impl From<Vec<String>> for ParameterValue {
    fn from(value: Vec<String>) -> Self {
        ParameterValue::Fields(value)
    }
}

impl From<Sink> for ParameterValue {
    fn from(sink: Sink) -> Self {
        ParameterValue::Sink(sink)
    }
}

impl<T: Into<ParameterValue>> From<Option<T>> for ParameterValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(ParameterValue::Null, Into::into)
    }
}

fn invalid(name: &str, reason: impl Into<String>) -> ProcessingError {
    ProcessingError::InvalidParameter {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Parameter map handed to [`Processing::run`](super::Processing::run).
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    values: HashMap<String, ParameterValue>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<ParameterValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<ParameterValue>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values.get(name)
    }

    fn present(&self, name: &str) -> Option<&ParameterValue> {
        self.values
            .get(name)
            .filter(|value| !matches!(value, ParameterValue::Null))
    }

    pub fn layer(&self, name: &str) -> Result<Arc<VectorLayer>, ProcessingError> {
        match self.present(name) {
            Some(ParameterValue::Layer(layer)) => Ok(Arc::clone(layer)),
            Some(ParameterValue::Text(path)) => Ok(Arc::new(VectorLayer::open(Path::new(path))?)),
            Some(other) => Err(invalid(name, format!("expected a layer, got {:?}", other))),
            None => Err(invalid(name, "missing")),
        }
    }

    pub fn crs(&self, name: &str) -> Result<Crs, ProcessingError> {
        match self.present(name) {
            Some(ParameterValue::Crs(crs)) => Ok(crs.clone()),
            Some(ParameterValue::Text(text)) => text.parse().map_err(|e| invalid(name, format!("{}", e))),
            Some(other) => Err(invalid(name, format!("expected a CRS, got {:?}", other))),
            None => Err(invalid(name, "missing")),
        }
    }

    /// Output destination, defaulting to memory when absent.
    pub fn sink(&self, name: &str) -> Result<Sink, ProcessingError> {
        match self.present(name) {
            Some(ParameterValue::Sink(sink)) => Ok(sink.clone()),
            Some(ParameterValue::Text(text)) => Ok(Sink::parse(text)),
            Some(other) => Err(invalid(name, format!("expected an output, got {:?}", other))),
            None => Ok(Sink::memory()),
        }
    }

    /// Numeric parameter where absent or null means "not set".
    pub fn optional_number(&self, name: &str) -> Result<Option<f64>, ProcessingError> {
        match self.present(name) {
            Some(ParameterValue::Number(value)) => Ok(Some(*value)),
            Some(ParameterValue::Integer(value)) => Ok(Some(*value as f64)),
            Some(ParameterValue::Text(text)) => text
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| invalid(name, format!("not a number: {}", text))),
            Some(other) => Err(invalid(name, format!("expected a number, got {:?}", other))),
            None => Ok(None),
        }
    }

    pub fn integer_or(&self, name: &str, default: i64) -> Result<i64, ProcessingError> {
        match self.present(name) {
            Some(ParameterValue::Integer(value)) => Ok(*value),
            Some(ParameterValue::Number(value)) if value.fract() == 0.0 => Ok(*value as i64),
            Some(ParameterValue::Text(text)) => text
                .trim()
                .parse()
                .map_err(|_| invalid(name, format!("not an integer: {}", text))),
            Some(other) => Err(invalid(name, format!("expected an integer, got {:?}", other))),
            None => Ok(default),
        }
    }

    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool, ProcessingError> {
        match self.present(name) {
            Some(ParameterValue::Bool(value)) => Ok(*value),
            Some(ParameterValue::Integer(value)) => Ok(*value != 0),
            Some(other) => Err(invalid(name, format!("expected a boolean, got {:?}", other))),
            None => Ok(default),
        }
    }

    pub fn text_or(&self, name: &str, default: &str) -> Result<String, ProcessingError> {
        match self.present(name) {
            Some(ParameterValue::Text(text)) => Ok(text.clone()),
            Some(other) => Err(invalid(name, format!("expected text, got {:?}", other))),
            None => Ok(default.to_string()),
        }
    }

    /// Field list. Text is split on `;`, empty text means no fields.
    pub fn fields(&self, name: &str) -> Result<Option<Vec<String>>, ProcessingError> {
        match self.present(name) {
            Some(ParameterValue::Fields(fields)) => Ok(Some(fields.clone())),
            Some(ParameterValue::Text(text)) => Ok(Some(
                text.split(';')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            Some(other) => Err(invalid(name, format!("expected a field list, got {:?}", other))),
            None => Ok(None),
        }
    }
}

#[derive(Debug)]
pub enum OutputValue {
    Layer {
        layer: VectorLayer,
        path: Option<PathBuf>,
    },
    Count(usize),
}

/// Named outputs of one algorithm run.
#[derive(Debug, Default)]
pub struct Outputs {
    values: HashMap<String, OutputValue>,
}

impl Outputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `layer` to `sink` and records it under `port`.
    pub fn emit_layer(
        &mut self,
        port: &str,
        mut layer: VectorLayer,
        sink: Sink,
    ) -> Result<(), ProcessingError> {
        let path = match sink {
            Sink::Memory(name) => {
                if let Some(name) = name {
                    layer.name = name;
                }
                None
            }
            Sink::File(path) => {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    layer.name = stem.to_string();
                }
                layer.write(&path)?;
                Some(path)
            }
        };
        self.values
            .insert(port.to_string(), OutputValue::Layer { layer, path });
        Ok(())
    }

    pub fn insert_count(&mut self, port: &str, count: usize) {
        self.values.insert(port.to_string(), OutputValue::Count(count));
    }

    pub fn get(&self, port: &str) -> Option<&OutputValue> {
        self.values.get(port)
    }

    pub fn layer(&self, port: &str) -> Result<&VectorLayer, ProcessingError> {
        match self.values.get(port) {
            Some(OutputValue::Layer { layer, .. }) => Ok(layer),
            _ => Err(ProcessingError::MissingOutput(port.to_string())),
        }
    }

    pub fn take_layer(&mut self, port: &str) -> Result<VectorLayer, ProcessingError> {
        match self.values.remove(port) {
            Some(OutputValue::Layer { layer, .. }) => Ok(layer),
            Some(other) => {
                self.values.insert(port.to_string(), other);
                Err(ProcessingError::MissingOutput(port.to_string()))
            }
            None => Err(ProcessingError::MissingOutput(port.to_string())),
        }
    }

    /// File the output was written to, when its sink was a path.
    pub fn path(&self, port: &str) -> Option<&Path> {
        match self.values.get(port) {
            Some(OutputValue::Layer { path, .. }) => path.as_deref(),
            _ => None,
        }
    }

    pub fn count(&self, port: &str) -> Result<usize, ProcessingError> {
        match self.values.get(port) {
            Some(OutputValue::Count(count)) => Ok(*count),
            _ => Err(ProcessingError::MissingOutput(port.to_string())),
        }
    }
}
