//! Sequential binary i/o with position tracking.
//!
//! All multi-byte values are Little Endian, in the header and in the data section alike.
//!
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::mem::size_of;

use paste::paste;
use unsigned_varint::{decode as varint_decode, encode as varint_encode};

use crate::errors::{Error, Result};

/// Longest string the header is allowed to carry. Anything longer is taken as corruption rather
/// than an attempt to allocate it.
pub(crate) const MAX_STRING_LENGTH: u64 = u16::MAX as u64;

/// Something that can be written to and read back from a `BinaryCursor`.
pub(crate) trait Serialize: Sized {
    /// Write self to a stream
    fn write_to(&self, cursor: &mut BinaryCursor<impl Write>) -> Result<()>;

    /// Read Self from a stream
    fn read_from(cursor: &mut BinaryCursor<impl Read>) -> Result<Self>;

    /// Number of bytes in the serialized representation
    fn size(&self) -> u64;
}

/// A fixed width value with a Little Endian byte representation.
pub trait Primitive: Copy {
    const WIDTH: usize;

    fn from_le_slice(bytes: &[u8]) -> Self;

    fn extend_le(self, buffer: &mut Vec<u8>);
}

macro_rules! Primitive {
    ($type:ident) => {
        impl Primitive for $type {
            const WIDTH: usize = size_of::<$type>();

            fn from_le_slice(bytes: &[u8]) -> Self {
                let mut buffer = [0; size_of::<$type>()];
                buffer.copy_from_slice(bytes);

                $type::from_le_bytes(buffer)
            }

            fn extend_le(self, buffer: &mut Vec<u8>) {
                buffer.extend_from_slice(&self.to_le_bytes());
            }
        }
    };
}

Primitive!(u8);
Primitive!(u16);
Primitive!(u32);
Primitive!(u64);
Primitive!(i32);
Primitive!(i64);
Primitive!(f32);
Primitive!(f64);

/// Reader/writer over a byte stream that knows where it is.
///
/// The position is counted from wherever the stream was when the cursor was created, unless the
/// cursor was created with `BinaryCursor::at`, in which case it is the stream's absolute position.
/// Short reads are never silently accepted: running out of bytes is reported as
/// `Error::TruncatedStream` with the offset and the number of bytes that were available.
///
pub struct BinaryCursor<S> {
    stream: S,
    position: u64,
}

impl<S> BinaryCursor<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            position: 0,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Seek> BinaryCursor<S> {
    /// Wrap a stream, picking up its current absolute position.
    pub fn at(mut stream: S) -> Result<Self> {
        let position = stream.stream_position()?;

        Ok(Self { stream, position })
    }

    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        if offset != self.position {
            self.position = self.stream.seek(SeekFrom::Start(offset))?;
        }

        Ok(())
    }
}

macro_rules! read_write {
    ($type:ident) => {
        paste! {
            #[doc = "Read a Little Endian encoded `" $type "`"]
            pub fn [<read_ $type>](&mut self) -> Result<$type> {
                self.read_value::<$type>()
            }
        }
    };
    (write $type:ident) => {
        paste! {
            #[doc = "Write a Little Endian encoded `" $type "`"]
            pub fn [<write_ $type>](&mut self, value: $type) -> Result<()> {
                self.write_value(value)
            }
        }
    };
}

impl<S: Read> BinaryCursor<S> {
    read_write!(u8);
    read_write!(u16);
    read_write!(u32);
    read_write!(u64);
    read_write!(i64);
    read_write!(f32);
    read_write!(f64);

    /// Fill `buffer` completely or fail with `Error::TruncatedStream`.
    pub fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<()> {
        let offset = self.position;
        let mut filled = 0;
        while filled < buffer.len() {
            match self.stream.read(&mut buffer[filled..]) {
                Ok(0) => {
                    self.position += filled as u64;
                    return Err(Error::TruncatedStream {
                        offset,
                        expected: buffer.len() as u64,
                        actual: filled as u64,
                    });
                }
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        self.position += filled as u64;

        Ok(())
    }

    pub fn read_value<T: Primitive>(&mut self) -> Result<T> {
        let mut buffer = [0; 8];
        let buffer = &mut buffer[..T::WIDTH];
        self.read_bytes(buffer)?;

        Ok(T::from_le_slice(buffer))
    }

    /// Read `count` consecutive values of type `T`
    ///
    /// The buffer only grows as bytes arrive, so a corrupt `count` fails with
    /// `Error::TruncatedStream` at the end of the stream instead of allocating up front.
    pub fn read_fixed<T: Primitive>(&mut self, count: usize) -> Result<Vec<T>> {
        let offset = self.position;
        let expected = (count as u64).saturating_mul(T::WIDTH as u64);
        let mut buffer = Vec::new();
        let read = (&mut self.stream).take(expected).read_to_end(&mut buffer);
        self.position += buffer.len() as u64;
        read?;

        if (buffer.len() as u64) < expected {
            return Err(Error::TruncatedStream {
                offset,
                expected,
                actual: buffer.len() as u64,
            });
        }

        Ok(buffer.chunks_exact(T::WIDTH).map(T::from_le_slice).collect())
    }

    /// Read an unsigned varint
    pub fn read_varint(&mut self) -> Result<u64> {
        let offset = self.position;
        let mut buffer = varint_encode::u64_buffer();
        for i in 0..buffer.len() {
            buffer[i] = self.read_u8()?;
            if varint_decode::is_last(buffer[i]) {
                let (n, _) =
                    varint_decode::u64(&buffer[..=i]).map_err(|err| Error::CorruptHeader {
                        offset,
                        reason: format!("bad varint: {err}"),
                    })?;
                return Ok(n);
            }
        }

        Err(Error::CorruptHeader {
            offset,
            reason: String::from("varint overflows 64 bits"),
        })
    }

    /// Read a varint length prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String> {
        let offset = self.position;
        let length = self.read_varint()?;
        if length > MAX_STRING_LENGTH {
            return Err(Error::CorruptHeader {
                offset,
                reason: format!("string length {length} exceeds {MAX_STRING_LENGTH}"),
            });
        }
        let mut bytes = vec![0; length as usize];
        self.read_bytes(&mut bytes)?;

        String::from_utf8(bytes).map_err(|err| Error::CorruptHeader {
            offset,
            reason: format!("string is not UTF-8: {err}"),
        })
    }
}

impl<S: Write> BinaryCursor<S> {
    read_write!(write u8);
    read_write!(write u16);
    read_write!(write u32);
    read_write!(write u64);
    read_write!(write i64);
    read_write!(write f32);
    read_write!(write f64);

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes)?;
        self.position += bytes.len() as u64;

        Ok(())
    }

    pub fn write_value<T: Primitive>(&mut self, value: T) -> Result<()> {
        let mut buffer = Vec::with_capacity(T::WIDTH);
        value.extend_le(&mut buffer);

        self.write_bytes(&buffer)
    }

    /// Write consecutive values of type `T`
    pub fn write_fixed<T: Primitive>(&mut self, values: &[T]) -> Result<()> {
        let mut buffer = Vec::with_capacity(values.len() * T::WIDTH);
        for value in values {
            value.extend_le(&mut buffer);
        }

        self.write_bytes(&buffer)
    }

    pub fn write_varint(&mut self, n: u64) -> Result<()> {
        let mut buffer = varint_encode::u64_buffer();

        self.write_bytes(varint_encode::u64(n, &mut buffer))
    }

    /// Write a varint length prefixed UTF-8 string
    pub fn write_string(&mut self, s: &str) -> Result<()> {
        self.write_varint(s.len() as u64)?;

        self.write_bytes(s.as_bytes())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.stream.flush()?;

        Ok(())
    }
}

/// Number of bytes `write_varint` uses for `n`
pub(crate) fn varint_size(n: u64) -> u64 {
    let mut buffer = varint_encode::u64_buffer();

    varint_encode::u64(n, &mut buffer).len() as u64
}

/// Number of bytes `write_string` uses for `s`
pub(crate) fn string_size(s: &str) -> u64 {
    varint_size(s.len() as u64) + s.len() as u64
}
