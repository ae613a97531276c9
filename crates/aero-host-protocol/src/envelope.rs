use std::fmt;
use std::sync::Arc;

use aero_host_shared::SharedHeap;
use serde_json::{Map, Value};

use crate::{DecodeError, MessagePort, Tag};

/// Executable module produced by the host for the execution unit.
#[derive(Clone, PartialEq, Eq)]
pub struct CompiledModule {
    bytes: Arc<[u8]>,
}

impl CompiledModule {
    pub fn new(bytes: Arc<[u8]>) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledModule")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Object carried next to the JSON fields instead of inside them.
#[derive(Debug)]
pub enum Attachment {
    /// Ownership-transferred byte buffer; the sender no longer has it.
    Buffer(Vec<u8>),
    /// Shared (not transferred) linear memory.
    Heap(SharedHeap),
    Port(MessagePort),
    Module(CompiledModule),
}

/// One message as it crosses a [`MessagePort`].
#[derive(Debug, Default)]
pub struct Envelope {
    fields: Map<String, Value>,
    attachments: Vec<Attachment>,
}

impl Envelope {
    pub fn from_parts(fields: Map<String, Value>, attachments: Vec<Attachment>) -> Self {
        Self {
            fields,
            attachments,
        }
    }

    pub fn into_parts(self) -> (Map<String, Value>, Vec<Attachment>) {
        (self.fields, self.attachments)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Numeric tag, read from `type` or, for clock-unit messages, `kind`.
    pub fn raw_tag(&self) -> Option<u32> {
        self.fields
            .get("type")
            .or_else(|| self.fields.get("kind"))
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }

    pub fn tag(&self) -> Result<Tag, DecodeError> {
        let raw = self.raw_tag().ok_or(DecodeError::MissingTag)?;
        Tag::from_u32(raw).ok_or(DecodeError::UnknownTag(raw))
    }
}

/// Incrementally builds an [`Envelope`].
pub(crate) struct Builder {
    fields: Map<String, Value>,
    attachments: Vec<Attachment>,
}

impl Builder {
    pub(crate) fn new(tag: Tag) -> Self {
        Self::keyed("type", tag)
    }

    pub(crate) fn keyed(key: &str, tag: Tag) -> Self {
        let mut fields = Map::new();
        fields.insert(key.to_string(), Value::from(tag as u32));
        Self {
            fields,
            attachments: Vec::new(),
        }
    }

    pub(crate) fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub(crate) fn attach(mut self, key: &str, attachment: Attachment) -> Self {
        let index = self.attachments.len();
        self.attachments.push(attachment);
        self.fields.insert(key.to_string(), Value::from(index));
        self
    }

    pub(crate) fn finish(self) -> Envelope {
        Envelope {
            fields: self.fields,
            attachments: self.attachments,
        }
    }
}

/// Typed access to the fields of a received [`Envelope`].
pub(crate) struct Fields {
    map: Map<String, Value>,
    attachments: Vec<Option<Attachment>>,
}

impl Fields {
    pub(crate) fn new(envelope: Envelope) -> Self {
        Self {
            map: envelope.fields,
            attachments: envelope.attachments.into_iter().map(Some).collect(),
        }
    }

    fn value(&self, key: &'static str) -> Result<&Value, DecodeError> {
        self.map.get(key).ok_or(DecodeError::MissingField(key))
    }

    pub(crate) fn u32(&self, key: &'static str) -> Result<u32, DecodeError> {
        self.value(key)?
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or(DecodeError::InvalidField(key))
    }

    pub(crate) fn i64(&self, key: &'static str) -> Result<i64, DecodeError> {
        self.value(key)?
            .as_i64()
            .ok_or(DecodeError::InvalidField(key))
    }

    pub(crate) fn bool(&self, key: &'static str) -> Result<bool, DecodeError> {
        self.value(key)?
            .as_bool()
            .ok_or(DecodeError::InvalidField(key))
    }

    pub(crate) fn string(&self, key: &'static str) -> Result<String, DecodeError> {
        self.value(key)?
            .as_str()
            .map(str::to_string)
            .ok_or(DecodeError::InvalidField(key))
    }

    pub(crate) fn u32_list(&self, key: &'static str) -> Result<Vec<u32>, DecodeError> {
        let items = self
            .value(key)?
            .as_array()
            .ok_or(DecodeError::InvalidField(key))?;
        items
            .iter()
            .map(|v| {
                v.as_u64()
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or(DecodeError::InvalidField(key))
            })
            .collect()
    }

    fn attachment(&mut self, key: &'static str) -> Result<Attachment, DecodeError> {
        let index = self.u32(key)? as usize;
        self.attachments
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(DecodeError::MissingAttachment(key))
    }

    pub(crate) fn buffer(&mut self, key: &'static str) -> Result<Vec<u8>, DecodeError> {
        match self.attachment(key)? {
            Attachment::Buffer(buf) => Ok(buf),
            _ => Err(DecodeError::InvalidField(key)),
        }
    }

    pub(crate) fn heap(&mut self, key: &'static str) -> Result<SharedHeap, DecodeError> {
        match self.attachment(key)? {
            Attachment::Heap(heap) => Ok(heap),
            _ => Err(DecodeError::InvalidField(key)),
        }
    }

    pub(crate) fn port(&mut self, key: &'static str) -> Result<MessagePort, DecodeError> {
        match self.attachment(key)? {
            Attachment::Port(port) => Ok(port),
            _ => Err(DecodeError::InvalidField(key)),
        }
    }

    pub(crate) fn module(&mut self, key: &'static str) -> Result<CompiledModule, DecodeError> {
        match self.attachment(key)? {
            Attachment::Module(module) => Ok(module),
            _ => Err(DecodeError::InvalidField(key)),
        }
    }
}
