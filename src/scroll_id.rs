//! Scroll id encoding and decoding
//!
//! A scroll id is the opaque handle a client receives with every scroll response and
//! hands back verbatim on the next request. It names, for every shard taking part in
//! the scroll, the node holding the shard's search context and the context id on that
//! node.
//!
//! # Wire Format
//!
//! The token is the URL-safe base64 encoding (with padding) of:
//!
//! ```text
//! u8      format version (currently 1)
//! vint    session tag length, followed by the UTF-8 tag bytes
//! vint    number of shard contexts (at least one)
//! repeated per shard context, in ordinal order:
//!   i64   context id (big-endian)
//!   vint  node id length, followed by the UTF-8 node id bytes
//! ```
//!
//! A `vint` stores an unsigned 32-bit value in 7-bit groups, low group first, with the
//! high bit of each byte marking a continuation. Encoding is deterministic, so a token
//! decoded and re-encoded yields the same string.
//!
//! # Usage Examples
//!
//! ```rust
//! use shardscroll::scroll_id::{ScrollToken, ShardContextRef, QUERY_THEN_FETCH_TYPE};
//!
//! # fn example() -> Result<(), shardscroll::ScrollError> {
//! let token = ScrollToken::new(
//!     QUERY_THEN_FETCH_TYPE,
//!     vec![ShardContextRef::new("node1", 1), ShardContextRef::new("node2", -1)],
//! )?;
//!
//! let encoded = token.encode();
//! let decoded = ScrollToken::decode(&encoded)?;
//! assert_eq!(decoded, token);
//! # Ok(())
//! # }
//! ```

use crate::error::ScrollError;
use crate::identifiers::{ContextId, NodeId};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Session tag used by scrolls that run a query phase followed by a fetch phase
pub const QUERY_THEN_FETCH_TYPE: &str = "queryThenFetch";

/// Session tag used by scrolls that query and fetch in a single round trip
pub const QUERY_AND_FETCH_TYPE: &str = "queryAndFetch";

/// Current scroll id format version
pub const SCROLL_ID_FORMAT_VERSION: u8 = 1;

/// A u32 never needs more than five 7-bit groups
const MAX_VINT_BYTES: usize = 5;

/// Smallest possible encoded shard context: an i64 plus a zero length node id
const MIN_CONTEXT_BYTES: usize = 9;

/// Continuation state for one shard: where its search context lives and its id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardContextRef {
    node: NodeId,
    context_id: ContextId,
}

impl ShardContextRef {
    /// Create a reference to the context `context_id` held on `node`
    pub fn new(node: impl Into<NodeId>, context_id: impl Into<ContextId>) -> Self {
        Self {
            node: node.into(),
            context_id: context_id.into(),
        }
    }

    /// Node holding the search context
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Search context id on that node
    pub fn context_id(&self) -> ContextId {
        self.context_id
    }
}

/// Decoded scroll id: a session tag plus the ordered shard contexts of the scroll
///
/// The position of a [`ShardContextRef`] in [`ScrollToken::context`] is the shard's
/// ordinal for every request made with this token. A token always holds at least one
/// shard context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollToken {
    session_tag: String,
    context: Vec<ShardContextRef>,
}

impl ScrollToken {
    /// Create a token from a session tag and its shard contexts
    ///
    /// # Errors
    /// Returns `InvalidInput` if `context` is empty or if any string is too long to be
    /// length-prefixed in the wire format.
    pub fn new(session_tag: impl Into<String>, context: Vec<ShardContextRef>) -> Result<Self, ScrollError> {
        let session_tag = session_tag.into();

        if context.is_empty() {
            return Err(ScrollError::invalid_input(
                "context",
                "a scroll id must reference at least one shard context",
                "Supply one shard context per shard taking part in the scroll",
            ));
        }
        ensure_encodable_len("session_tag", session_tag.len())?;
        ensure_encodable_len("context", context.len())?;
        for shard in &context {
            ensure_encodable_len("node", shard.node.as_str().len())?;
        }

        Ok(Self { session_tag, context })
    }

    /// Session tag stored alongside the shard contexts
    pub fn session_tag(&self) -> &str {
        &self.session_tag
    }

    /// Shard contexts in ordinal order
    pub fn context(&self) -> &[ShardContextRef] {
        &self.context
    }

    /// Number of shard contexts
    pub fn len(&self) -> usize {
        self.context.len()
    }

    /// Check whether the token has no shard contexts
    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
    }

    /// Split the token into its session tag and shard contexts
    pub fn into_parts(self) -> (String, Vec<ShardContextRef>) {
        (self.session_tag, self.context)
    }

    /// Encode the token into its client-facing string form
    pub fn encode(&self) -> String {
        let capacity = 1
            + MAX_VINT_BYTES * 2
            + self.session_tag.len()
            + self
                .context
                .iter()
                .map(|shard| 8 + MAX_VINT_BYTES + shard.node.as_str().len())
                .sum::<usize>();
        let mut out = BytesMut::with_capacity(capacity);

        out.put_u8(SCROLL_ID_FORMAT_VERSION);
        put_string(&mut out, &self.session_tag);
        // Lengths were checked against u32::MAX when the token was built
        put_vint(&mut out, self.context.len() as u32);
        for shard in &self.context {
            out.put_i64(shard.context_id.raw());
            put_string(&mut out, shard.node.as_str());
        }

        URL_SAFE.encode(&out)
    }

    /// Decode a client supplied scroll id
    ///
    /// # Errors
    /// Returns `MalformedToken` if the token is not valid base64, carries an unknown
    /// format version, is truncated, contains invalid UTF-8, has trailing bytes, or
    /// references zero shard contexts.
    pub fn decode(token: &str) -> Result<Self, ScrollError> {
        if token.is_empty() {
            return Err(ScrollError::malformed_token("scroll id is empty"));
        }

        let raw = URL_SAFE
            .decode(token)
            .map_err(|e| ScrollError::malformed_token(format!("invalid base64: {}", e)))?;
        let mut reader = TokenReader { buf: &raw };

        let version = reader.read_u8("version")?;
        if version != SCROLL_ID_FORMAT_VERSION {
            return Err(ScrollError::malformed_token(format!(
                "unsupported format version {} (expected {})",
                version, SCROLL_ID_FORMAT_VERSION
            )));
        }

        let session_tag = reader.read_string("session tag")?;
        let count = reader.read_vint("context count")? as usize;
        if count == 0 {
            return Err(ScrollError::malformed_token("scroll id contains no shard contexts"));
        }
        if count > reader.remaining() / MIN_CONTEXT_BYTES {
            return Err(ScrollError::malformed_token(format!(
                "context count {} does not fit in the remaining {} bytes",
                count,
                reader.remaining()
            )));
        }

        let mut context = Vec::with_capacity(count);
        for _ in 0..count {
            let context_id = reader.read_i64("context id")?;
            let node = reader.read_string("node id")?;
            context.push(ShardContextRef::new(node, context_id));
        }

        if reader.remaining() != 0 {
            return Err(ScrollError::malformed_token(format!(
                "not all bytes were read ({} trailing)",
                reader.remaining()
            )));
        }

        Ok(Self { session_tag, context })
    }
}

impl Display for ScrollToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for ScrollToken {
    type Err = ScrollError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

/// Encode a session tag and shard contexts into a scroll id
pub fn encode_scroll_id(session_tag: &str, context: &[ShardContextRef]) -> Result<String, ScrollError> {
    Ok(ScrollToken::new(session_tag, context.to_vec())?.encode())
}

/// Decode a scroll id into its session tag and shard contexts
pub fn parse_scroll_id(token: &str) -> Result<(String, Vec<ShardContextRef>), ScrollError> {
    Ok(ScrollToken::decode(token)?.into_parts())
}

fn ensure_encodable_len(field: &str, len: usize) -> Result<(), ScrollError> {
    if u32::try_from(len).is_err() {
        return Err(ScrollError::invalid_input(
            field,
            format!("length {} exceeds the scroll id limit of {}", len, u32::MAX),
            "Use shorter identifiers",
        ));
    }
    Ok(())
}

fn put_vint(out: &mut BytesMut, mut value: u32) {
    while value >= 0x80 {
        out.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.put_u8(value as u8);
}

fn put_string(out: &mut BytesMut, value: &str) {
    put_vint(out, value.len() as u32);
    out.put_slice(value.as_bytes());
}

/// Bounds-checked reader over decoded token bytes
struct TokenReader<'a> {
    buf: &'a [u8],
}

impl TokenReader<'_> {
    fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize, field: &str) -> Result<(), ScrollError> {
        if self.buf.remaining() < needed {
            return Err(ScrollError::malformed_token(format!(
                "truncated while reading {}: needed {} bytes, {} left",
                field,
                needed,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    fn read_u8(&mut self, field: &str) -> Result<u8, ScrollError> {
        self.ensure(1, field)?;
        Ok(self.buf.get_u8())
    }

    fn read_i64(&mut self, field: &str) -> Result<i64, ScrollError> {
        self.ensure(8, field)?;
        Ok(self.buf.get_i64())
    }

    fn read_vint(&mut self, field: &str) -> Result<u32, ScrollError> {
        let mut value: u64 = 0;
        for index in 0..MAX_VINT_BYTES {
            let byte = self.read_u8(field)?;
            value |= u64::from(byte & 0x7f) << (7 * index);
            if byte & 0x80 == 0 {
                return u32::try_from(value)
                    .map_err(|_| ScrollError::malformed_token(format!("{} overflows a 32-bit length", field)));
            }
        }
        Err(ScrollError::malformed_token(format!(
            "{} is longer than {} bytes",
            field, MAX_VINT_BYTES
        )))
    }

    fn read_string(&mut self, field: &str) -> Result<String, ScrollError> {
        let len = self.read_vint(field)? as usize;
        self.ensure(len, field)?;
        let bytes = self.buf[..len].to_vec();
        self.buf.advance(len);
        String::from_utf8(bytes).map_err(|_| ScrollError::malformed_token(format!("{} is not valid UTF-8", field)))
    }
}
