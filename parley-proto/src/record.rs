//! Record layout for Parley frames.
//!
//! A record is the payload carried inside one length-prefixed frame (see
//! [`crate::codec`]). Records keep the original pipe-delimited field layout:
//!
//! - text frame: `{sender}|{recipient}|{body}`
//! - file header: `FILE|{sender}|{recipient}|{filename}|{size}`
//! - delivery (server to client): `{sender}: {body}`
//!
//! The delimiter is never escaped. Only the body of a text frame may contain
//! `|`, because it is always the last field.

/// Tag that opens a file-transfer header record.
pub const FILE_TAG: &str = "FILE";

/// Separator between record fields.
pub const FIELD_DELIMITER: char = '|';

/// Separator between sender and body in a delivery record.
pub const DELIVERY_SEPARATOR: &str = ": ";

/// Errors produced while parsing or building a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// The record bytes are not valid UTF-8.
    #[error("record is not valid UTF-8")]
    InvalidUtf8,

    /// The record does not have the number of fields its kind requires.
    #[error("expected {expected} fields, found {found}")]
    FieldCount {
        /// Fields required by the record kind.
        expected: usize,
        /// Fields actually present.
        found: usize,
    },

    /// A required field is empty.
    #[error("field `{0}` must not be empty")]
    EmptyField(&'static str),

    /// A field that is not last in its record contains the delimiter.
    #[error("field `{0}` must not contain '|'")]
    DelimiterInField(&'static str),

    /// A username collides with the file header tag.
    #[error("`{FILE_TAG}` is reserved and cannot be used as a username")]
    ReservedName,

    /// The size field of a file header is not an unsigned integer.
    #[error("invalid file size `{0}`")]
    InvalidSize(String),
}

/// A text message from `sender` to `recipient`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFrame {
    /// Username of the author.
    pub sender: String,
    /// Username of the addressee.
    pub recipient: String,
    /// Message text; may contain `|`.
    pub body: String,
}

/// Announces a file payload of exactly `size` bytes following on the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Username of the author.
    pub sender: String,
    /// Username of the addressee.
    pub recipient: String,
    /// Name the sender gave the file.
    pub filename: String,
    /// Number of raw payload bytes that follow the header.
    pub size: u64,
}

/// A frame sent by a client after the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text message.
    Text(TextFrame),
    /// File-transfer header.
    FileHeader(FileHeader),
}

impl Frame {
    /// Builds a text frame.
    pub fn text(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::Text(TextFrame {
            sender: sender.into(),
            recipient: recipient.into(),
            body: body.into(),
        })
    }

    /// Builds a file header frame.
    pub fn file_header(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        filename: impl Into<String>,
        size: u64,
    ) -> Self {
        Self::FileHeader(FileHeader {
            sender: sender.into(),
            recipient: recipient.into(),
            filename: filename.into(),
            size,
        })
    }

    /// Parses a record payload into a frame.
    ///
    /// A record starting with `FILE|` is a file header; anything else must
    /// be a three-field text record.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] if the payload is not UTF-8, has the wrong
    /// number of fields, has an empty username, or a bad size field.
    pub fn parse(payload: &[u8]) -> Result<Self, RecordError> {
        let record = std::str::from_utf8(payload).map_err(|_| RecordError::InvalidUtf8)?;

        if let Some(rest) = record
            .strip_prefix(FILE_TAG)
            .and_then(|r| r.strip_prefix(FIELD_DELIMITER))
        {
            return parse_file_header(rest).map(Self::FileHeader);
        }

        let fields: Vec<&str> = record.splitn(3, FIELD_DELIMITER).collect();
        let [sender, recipient, body] = fields[..] else {
            return Err(RecordError::FieldCount {
                expected: 3,
                found: fields.len(),
            });
        };
        non_empty("sender", sender)?;
        non_empty("recipient", recipient)?;

        Ok(Self::text(sender, recipient, body))
    }

    /// Serializes the frame into its record payload.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] if a username or the filename is empty,
    /// contains the delimiter, or if the sender is the reserved tag.
    pub fn to_record(&self) -> Result<String, RecordError> {
        match self {
            Self::Text(text) => {
                validate_username(&text.sender)?;
                validate_field("recipient", &text.recipient)?;
                Ok(format!(
                    "{}{FIELD_DELIMITER}{}{FIELD_DELIMITER}{}",
                    text.sender, text.recipient, text.body
                ))
            }
            Self::FileHeader(header) => {
                validate_field("sender", &header.sender)?;
                validate_field("recipient", &header.recipient)?;
                validate_field("filename", &header.filename)?;
                Ok(format!(
                    "{FILE_TAG}{FIELD_DELIMITER}{}{FIELD_DELIMITER}{}{FIELD_DELIMITER}{}{FIELD_DELIMITER}{}",
                    header.sender, header.recipient, header.filename, header.size
                ))
            }
        }
    }

    /// Returns the sender named in the frame.
    #[must_use]
    pub fn sender(&self) -> &str {
        match self {
            Self::Text(text) => &text.sender,
            Self::FileHeader(header) => &header.sender,
        }
    }
}

fn parse_file_header(rest: &str) -> Result<FileHeader, RecordError> {
    let fields: Vec<&str> = rest.split(FIELD_DELIMITER).collect();
    let [sender, recipient, filename, size] = fields[..] else {
        // The tag counts as a field in the wire layout.
        return Err(RecordError::FieldCount {
            expected: 5,
            found: fields.len() + 1,
        });
    };
    non_empty("sender", sender)?;
    non_empty("recipient", recipient)?;
    non_empty("filename", filename)?;
    let size = size
        .parse::<u64>()
        .map_err(|_| RecordError::InvalidSize(size.to_string()))?;

    Ok(FileHeader {
        sender: sender.to_string(),
        recipient: recipient.to_string(),
        filename: filename.to_string(),
        size,
    })
}

/// Checks that a username can be used in a handshake or as a sender.
///
/// # Errors
///
/// Returns [`RecordError`] if the name is empty, contains `|`, or equals
/// the reserved [`FILE_TAG`].
pub fn validate_username(name: &str) -> Result<(), RecordError> {
    validate_field("username", name)?;
    if name == FILE_TAG {
        return Err(RecordError::ReservedName);
    }
    Ok(())
}

/// Parses the handshake payload: the raw username bytes.
///
/// # Errors
///
/// Returns [`RecordError`] if the bytes are not UTF-8 or do not form a
/// valid username.
pub fn parse_handshake(payload: &[u8]) -> Result<String, RecordError> {
    let name = std::str::from_utf8(payload).map_err(|_| RecordError::InvalidUtf8)?;
    validate_username(name)?;
    Ok(name.to_string())
}

/// Formats the record delivered to a recipient.
#[must_use]
pub fn delivery(sender: &str, body: &str) -> String {
    format!("{sender}{DELIVERY_SEPARATOR}{body}")
}

/// Splits a delivery record into `(sender, body)`.
#[must_use]
pub fn parse_delivery(record: &str) -> Option<(&str, &str)> {
    record.split_once(DELIVERY_SEPARATOR)
}

fn validate_field(field: &'static str, value: &str) -> Result<(), RecordError> {
    non_empty(field, value)?;
    if value.contains(FIELD_DELIMITER) {
        return Err(RecordError::DelimiterInField(field));
    }
    Ok(())
}

const fn non_empty(field: &'static str, value: &str) -> Result<(), RecordError> {
    if value.is_empty() {
        Err(RecordError::EmptyField(field))
    } else {
        Ok(())
    }
}
