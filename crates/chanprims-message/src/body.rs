//! Message bodies.
//!
//! A [`BodyWriter`] produces body content into an [`InfosetWriter`]. Writers
//! that are not buffered may be consumed once; [`Body`] enforces that and
//! converts single-use content into a replayable capture on request.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{MessageError, Result};
use crate::infoset::{InfosetBuffer, InfosetWriter};

/// Produces the contents of a message body.
pub trait BodyWriter: Send + Sync {
    /// Buffered writers may be written any number of times.
    fn is_buffered(&self) -> bool;

    fn is_empty(&self) -> bool {
        false
    }

    fn on_write_body_contents(&self, writer: &mut InfosetWriter) -> Result<()>;
}

/// A body writer plus the single-write guard for non-buffered writers.
pub struct Body {
    writer: Arc<dyn BodyWriter>,
    written: Mutex<bool>,
}

impl Body {
    pub fn new(writer: impl BodyWriter + 'static) -> Self {
        Self::from_arc(Arc::new(writer))
    }

    pub fn from_arc(writer: Arc<dyn BodyWriter>) -> Self {
        Self {
            writer,
            written: Mutex::new(false),
        }
    }

    pub fn empty() -> Self {
        Self::new(EmptyBodyWriter)
    }

    /// A buffered body replaying `buffer`.
    pub fn buffered(buffer: InfosetBuffer) -> Self {
        Self::new(InfosetBodyWriter::new(buffer))
    }

    pub fn is_buffered(&self) -> bool {
        self.writer.is_buffered()
    }

    pub fn is_empty(&self) -> bool {
        self.writer.is_empty()
    }

    /// Write the body contents.
    ///
    /// Fails with `InvalidOperation` on the second call for a non-buffered
    /// writer, including after [`create_buffered_copy`](Self::create_buffered_copy).
    pub fn write_body_contents(&self, writer: &mut InfosetWriter) -> Result<()> {
        if !self.writer.is_buffered() {
            self.claim()?;
        }
        self.writer.on_write_body_contents(writer)
    }

    /// A body that can be written any number of times.
    ///
    /// Buffered bodies share their writer. Otherwise the single write is
    /// claimed and the content captured into at most `max_buffer_size` bytes.
    pub fn create_buffered_copy(&self, max_buffer_size: usize) -> Result<Body> {
        if self.writer.is_buffered() {
            return Ok(Body::from_arc(Arc::clone(&self.writer)));
        }
        self.claim()?;

        let mut capture = InfosetWriter::with_max_size(max_buffer_size);
        self.writer.on_write_body_contents(&mut capture)?;
        let buffer = capture.into_buffer()?;
        tracing::trace!(size = buffer.size(), "body captured into buffer");
        Ok(Body::buffered(buffer))
    }

    fn claim(&self) -> Result<()> {
        let mut written = self.written.lock();
        if *written {
            return Err(MessageError::InvalidOperation(
                "body writer can only be written once".into(),
            ));
        }
        *written = true;
        Ok(())
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Body")
            .field("buffered", &self.is_buffered())
            .field("written", &*self.written.lock())
            .finish()
    }
}

/// A single element containing text, e.g. `<echo xmlns="urn:x">hi</echo>`.
#[derive(Debug, Clone)]
pub struct TextBodyWriter {
    local_name: String,
    namespace: String,
    text: String,
}

impl TextBodyWriter {
    pub fn new(
        local_name: impl Into<String>,
        namespace: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            local_name: local_name.into(),
            namespace: namespace.into(),
            text: text.into(),
        }
    }
}

impl BodyWriter for TextBodyWriter {
    fn is_buffered(&self) -> bool {
        false
    }

    fn on_write_body_contents(&self, writer: &mut InfosetWriter) -> Result<()> {
        writer.write_element_string("", &self.local_name, &self.namespace, &self.text)
    }
}

/// Replays captured infoset content.
#[derive(Debug, Clone)]
pub struct InfosetBodyWriter {
    buffer: InfosetBuffer,
}

impl InfosetBodyWriter {
    pub fn new(buffer: InfosetBuffer) -> Self {
        Self { buffer }
    }

    pub fn buffer(&self) -> &InfosetBuffer {
        &self.buffer
    }
}

impl BodyWriter for InfosetBodyWriter {
    fn is_buffered(&self) -> bool {
        true
    }

    fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn on_write_body_contents(&self, writer: &mut InfosetWriter) -> Result<()> {
        self.buffer.write_to(writer)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyBodyWriter;

impl BodyWriter for EmptyBodyWriter {
    fn is_buffered(&self) -> bool {
        true
    }

    fn is_empty(&self) -> bool {
        true
    }

    fn on_write_body_contents(&self, _writer: &mut InfosetWriter) -> Result<()> {
        Ok(())
    }
}
