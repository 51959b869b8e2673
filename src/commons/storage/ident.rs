//! Identifiers for components of a storage key.

use std::{error, fmt, mem};


//------------ Ident ---------------------------------------------------------

/// An identifier for a scope or key in the store.
///
/// Idents are strings with a severly limited set of allowed characters.
/// Specifically, only ASCII letters and digits, plus, dash, underscore, and
/// periods are allowed. They can never be empty and they cannot start with
/// a period. This makes them safe to use as file names.
///
/// This type is an unsized type and needs to be used behind some kind of
/// pointer.
#[derive(Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Ident(str);

impl Ident {
    /// Creates a new ident from a string slice.
    pub const fn from_str(s: &str) -> Result<&Self, IdentError> {
        if let Err(err) = Self::check_bytes(s.as_bytes()) {
            return Err(err)
        }

        // Safety: We just checked.
        Ok(unsafe { Self::from_str_unchecked(s) })
    }

    /// Creates a ident from the given string slice or panics.
    ///
    /// This function should be used to create ident constants.
    pub const fn make(s: &str) -> &Self {
        match Self::from_str(s) {
            Ok(some) => some,
            Err(_) => panic!("invalid storage identifier")
        }
    }

    /// Creates a new ident from a string slice without checking.
    ///
    /// # Safety
    ///
    /// The string must not be empty and must only contain valid
    /// characters.
    const unsafe fn from_str_unchecked(s: &str) -> &Self {
        // SAFETY: Self has #repr(transparent)
        unsafe { mem::transmute(s) }
    }

    /// Creates a new boxed ident from an owned string.
    pub fn boxed_from_string(s: String) -> Result<Box<Self>, IdentError> {
        Self::check_bytes(s.as_bytes())?;

        // Safety: We just checked.
        Ok(unsafe { Self::boxed_from_string_unchecked(s) })
    }

    /// Creates a new boxed ident from an owned string without checking.
    ///
    /// # Safety
    ///
    /// The string must not be empty and must only contain valid characters.
    unsafe fn boxed_from_string_unchecked(s: String) -> Box<Self> {
        // SAFETY: Self has #repr(transparent)
        unsafe { mem::transmute::<Box<str>, Box<Self>>(s.into_boxed_str()) }
    }

    /// Checks that `bytes` contains a valid ident.
    const fn check_bytes(mut bytes: &[u8]) -> Result<(), IdentError> {
        let Some(first) = bytes.first() else {
            return Err(IdentError(IdentErrorEnum::Empty))
        };
        if *first == b'.' {
            return Err(IdentError(IdentErrorEnum::LeadingDot))
        }

        while let Some((head, tail)) = bytes.split_first() {
            if !is_ident_char(*head) {
                return Err(
                    IdentError(IdentErrorEnum::IllegalCharacter(*head))
                )
            }
            bytes = tail;
        }
        Ok(())
    }

    /// Returns a builder starting with the given converted string.
    pub fn builder(first: &str) -> IdentBuilder {
        IdentBuilder { content: String::new() }.push_converted_str(first)
    }

    /// Converts the ident to a string slice.
    pub const fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a boxed ident equal to this ident.
    pub fn to_boxed(&self) -> Box<Self> {
        // Safety: we already have the correct content.
        unsafe { Ident::boxed_from_string_unchecked(self.0.to_string()) }
    }

    /// Splits the ident into the strings originally added via a builder.
    ///
    /// This reverses [`IdentBuilder::push_converted_str`] for an ident
    /// built only from converted strings. Returns `None` if the ident was
    /// not constructed that way.
    pub fn split_converted(&self) -> Option<Vec<String>> {
        self.0.split(SEPARATOR).map(decode_converted).collect()
    }

    /// Splits an ident created with an extension.
    ///
    /// This reverses [`IdentBuilder::finish_with_extension`]. Returns
    /// `None` if the ident doesn’t end in the extension or the remainder
    /// was not built from converted strings.
    pub fn split_converted_with_extension(
        &self, extension: &Ident
    ) -> Option<Vec<String>> {
        let stem = self.0.strip_suffix(extension.as_str())?
            .strip_suffix('.')?;
        Ident::from_str(stem).ok()?.split_converted()
    }
}

const fn is_ident_char(ch: u8) -> bool {
    ch.is_ascii_alphanumeric()
        || ch == b'+' || ch == b'-' || ch == b'_' || ch == b'.'
}

/// Separates converted strings in an ident.
const SEPARATOR: char = '_';

/// Marks a hex encoded converted string.
const HEX_MARKER: char = '+';

/// Returns whether a string can be used verbatim as a converted part.
fn is_verbatim(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('.')
        && s.bytes().all(|ch| {
            ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == b'.'
        })
}

fn decode_converted(part: &str) -> Option<String> {
    match part.strip_prefix(HEX_MARKER) {
        Some(hex) => {
            String::from_utf8(hex::decode(hex).ok()?).ok()
        }
        None => {
            if is_verbatim(part) {
                Some(part.to_string())
            }
            else {
                None
            }
        }
    }
}


//--- Clone

impl Clone for Box<Ident> {
    fn clone(&self) -> Self {
        self.to_boxed()
    }
}


//--- From

impl<'a> From<&'a Ident> for Box<Ident> {
    fn from(src: &'a Ident) -> Self {
        src.to_boxed()
    }
}


//--- AsRef

impl AsRef<str> for Ident {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}


//--- ToOwned

impl ToOwned for Ident {
    type Owned = Box<Ident>;

    fn to_owned(&self) -> Self::Owned {
        self.to_boxed()
    }
}


//--- Display

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}


//------------ IdentBuilder --------------------------------------------------

/// Construct an ident from arbitrary strings.
///
/// Each string is added either verbatim, if it is non-empty, only consists
/// of lower case ASCII letters, digits and periods, and doesn’t start with
/// a period, or as a plus followed by the lower case hex representation of
/// its octets. The parts are separated by underscores. Because neither form
/// can contain an underscore, the resulting ident can be split back into
/// the original strings. Because neither form contains upper case letters,
/// strings differing only in case never share an ident, even on file
/// systems that ignore case.
///
/// A builder is created via [`Ident::builder`] which adds the first part.
#[derive(Clone, Debug)]
pub struct IdentBuilder {
    content: String,
}

impl IdentBuilder {
    /// Adds a string, converting it if it can’t be used verbatim.
    pub fn push_converted_str(mut self, s: &str) -> Self {
        if !self.content.is_empty() {
            self.content.push(SEPARATOR);
        }
        if is_verbatim(s) {
            self.content.push_str(s);
        }
        else {
            self.content.push(HEX_MARKER);
            self.content.push_str(&hex::encode(s));
        }
        self
    }

    /// Adds a dot followed by an ident and returns the resulting ident.
    pub fn finish_with_extension(mut self, extension: &Ident) -> Box<Ident> {
        self.content.push('.');
        self.content.push_str(extension.as_str());
        self.finish()
    }

    /// Finalises building and returns the resulting ident.
    pub fn finish(self) -> Box<Ident> {
        // Safety: The builder always starts with a part. Every part is
        //         non-empty, doesn’t start with a period and only consists
        //         of allowed characters.
        unsafe { Ident::boxed_from_string_unchecked(self.content) }
    }
}


//------------ IdentError ----------------------------------------------------

/// An error happened while parsing an [`Ident`].
#[derive(Clone, Copy, Debug)]
pub struct IdentError(IdentErrorEnum);

#[derive(Clone, Copy, Debug)]
enum IdentErrorEnum {
    Empty,
    LeadingDot,
    IllegalCharacter(u8)
}

impl fmt::Display for IdentError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::IdentErrorEnum::*;

        match self.0 {
            Empty => f.write_str("empty storage identifier"),
            LeadingDot => f.write_str("leading period"),
            IllegalCharacter(n) => {
                match char::from_u32(n.into()) {
                    Some(ch) => {
                        write!(f,
                            "storage identifier with illegal character '{ch}'"
                        )
                    },
                    None => {
                        write!(f,
                            "storage identifier with illegal character \
                             0x{n:02x}'"
                        )
                    }
                }
            }
        }
    }
}

impl error::Error for IdentError { }


//============ Tests =========================================================
