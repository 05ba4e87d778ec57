//! Reads (and writes) the NumPy `.npy` arrays the training pipeline dumps
//! its test set into. The files have the following structure:
//!
//! - A magic string, `\x93NUMPY`.
//! - A major and minor version byte.
//! - A little-endian header length, `u16` for version 1 and `u32` after.
//! - The header, which is a Python dict literal, e.g.
//!   `{'descr': '<f4', 'fortran_order': False, 'shape': (120, 64, 64), }`,
//!   padded with spaces and a newline.
//! - The raw, C-ordered array data.
//!
//! Only little-endian numeric dtypes in C order are supported, which is
//! everything `np.save` produces for the arrays we care about. All values are
//! widened to `f64`.

use nom::{
    branch::alt,
    bytes::complete::{tag, take, take_till},
    character::complete::{char, multispace0, u64 as dec_u64},
    combinator::{map, opt, value},
    multi::separated_list0,
    number::complete::{le_u16, le_u32, u8 as byte},
    sequence::{delimited, separated_pair, terminated},
    Finish, IResult,
};

use std::{borrow::Cow, fmt, fs, io, path::Path};

const MAGIC: &[u8] = b"\x93NUMPY";

/// An n-dimensional array, flattened in C order.
#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    /// Length of each axis.
    pub shape: Vec<usize>,
    /// Values, widened to `f64`.
    pub data: Vec<f64>,
}

/// A nice little error for the ways an `.npy` file can be unreadable.
#[derive(Debug)]
pub enum NpyError {
    /// Returned when io fails when reading or writing files.
    IoError(io::Error),

    /// Returned when the magic string or version bytes are wrong.
    BadPreamble,

    /// Returned when the header dict could not be parsed.
    BadHeader(String),

    /// Returned for dtypes we do not decode, e.g. big-endian or strings.
    UnsupportedDtype(String),

    /// Returned for arrays saved in Fortran order.
    FortranOrder,

    /// Returned when there are fewer data bytes than the shape requires.
    Truncated {
        /// bytes the header promised
        expected: usize,
        /// bytes actually present
        found: usize,
    },
}

impl fmt::Display for NpyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use NpyError as NE;
        let msg = match self {
            NE::IoError(error) => Cow::from(format!("io error: {}", error)),
            NE::BadPreamble => Cow::from("not an npy file"),
            NE::BadHeader(h) => Cow::from(format!("unreadable npy header: {}", h)),
            NE::UnsupportedDtype(d) => Cow::from(format!("unsupported dtype {}", d)),
            NE::FortranOrder => Cow::from("fortran ordered arrays are not supported"),
            NE::Truncated { expected, found } => Cow::from(format!(
                "array data truncated, expected {} bytes but found {}",
                expected, found
            )),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for NpyError {}

impl From<io::Error> for NpyError {
    fn from(value: io::Error) -> Self {
        NpyError::IoError(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dtype {
    F4,
    F8,
    I4,
    I8,
    U1,
    B1,
}

impl Dtype {
    fn from_descr(descr: &str) -> Result<Self, NpyError> {
        match descr {
            "<f4" => Ok(Dtype::F4),
            "<f8" => Ok(Dtype::F8),
            "<i4" => Ok(Dtype::I4),
            "<i8" => Ok(Dtype::I8),
            "|u1" | "<u1" => Ok(Dtype::U1),
            "|b1" => Ok(Dtype::B1),
            other => Err(NpyError::UnsupportedDtype(other.to_owned())),
        }
    }

    fn size(self) -> usize {
        match self {
            Dtype::F4 | Dtype::I4 => 4,
            Dtype::F8 | Dtype::I8 => 8,
            Dtype::U1 | Dtype::B1 => 1,
        }
    }

    fn decode(self, bytes: &[u8]) -> Vec<f64> {
        let chunks = bytes.chunks_exact(self.size());
        match self {
            Dtype::F4 => chunks
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
                .collect(),
            Dtype::F8 => chunks
                .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect(),
            Dtype::I4 => chunks
                .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
                .collect(),
            Dtype::I8 => chunks
                .map(|b| {
                    i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f64
                })
                .collect(),
            Dtype::U1 | Dtype::B1 => chunks.map(|b| b[0] as f64).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum HeaderValue<'a> {
    Str(&'a str),
    Bool(bool),
    Shape(Vec<usize>),
}

#[derive(Debug, Clone, PartialEq)]
struct Header {
    dtype: Dtype,
    fortran_order: bool,
    shape: Vec<usize>,
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn quoted(s: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('\''), take_till(|c: char| c == '\''), char('\'')),
        delimited(char('"'), take_till(|c: char| c == '"'), char('"')),
    ))(s)
}

fn shape(s: &str) -> IResult<&str, Vec<usize>> {
    delimited(
        char('('),
        terminated(
            separated_list0(ws(char(',')), ws(map(dec_u64, |v| v as usize))),
            opt(ws(char(','))),
        ),
        char(')'),
    )(s)
}

fn header_value(s: &str) -> IResult<&str, HeaderValue> {
    alt((
        map(quoted, HeaderValue::Str),
        value(HeaderValue::Bool(true), tag("True")),
        value(HeaderValue::Bool(false), tag("False")),
        map(shape, HeaderValue::Shape),
    ))(s)
}

fn header_dict(s: &str) -> IResult<&str, Vec<(&str, HeaderValue)>> {
    delimited(
        ws(char('{')),
        terminated(
            separated_list0(
                ws(char(',')),
                separated_pair(ws(quoted), char(':'), ws(header_value)),
            ),
            opt(ws(char(','))),
        ),
        ws(char('}')),
    )(s)
}

fn parse_header(text: &str) -> Result<Header, NpyError> {
    let bad = || NpyError::BadHeader(text.trim().to_owned());
    let (_, entries) = header_dict(text).finish().map_err(|_| bad())?;

    let mut descr = None;
    let mut fortran_order = None;
    let mut dims = None;
    for (key, val) in entries {
        match (key, val) {
            ("descr", HeaderValue::Str(d)) => descr = Some(d),
            ("fortran_order", HeaderValue::Bool(b)) => fortran_order = Some(b),
            ("shape", HeaderValue::Shape(s)) => dims = Some(s),
            _ => return Err(bad()),
        }
    }

    Ok(Header {
        dtype: Dtype::from_descr(descr.ok_or_else(bad)?)?,
        fortran_order: fortran_order.ok_or_else(bad)?,
        shape: dims.ok_or_else(bad)?,
    })
}

/// Magic, version, and header length; returns the header bytes.
fn preamble(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, _) = tag(MAGIC)(input)?;
    let (input, major) = byte(input)?;
    let (input, _minor) = byte(input)?;
    let (input, header_len) = if major == 1 {
        map(le_u16, |v| v as usize)(input)?
    } else {
        map(le_u32, |v| v as usize)(input)?
    };
    take(header_len)(input)
}

impl NpyArray {
    /// Read an array from the path provided.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, NpyError> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Read an array from an in-memory `.npy` image.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, NpyError> {
        let (data, header) = preamble(bytes)
            .finish()
            .map_err(|_| NpyError::BadPreamble)?;
        let header = parse_header(&String::from_utf8_lossy(header))?;

        if header.fortran_order {
            return Err(NpyError::FortranOrder);
        }

        let expected = header
            .shape
            .iter()
            .try_fold(header.dtype.size(), |bytes, &dim| bytes.checked_mul(dim))
            .ok_or_else(|| {
                NpyError::BadHeader(format!("shape {:?} is too large", header.shape))
            })?;
        if data.len() < expected {
            return Err(NpyError::Truncated {
                expected,
                found: data.len(),
            });
        }

        Ok(NpyArray {
            shape: header.shape,
            data: header.dtype.decode(&data[..expected]),
        })
    }

    /// Encode as a version 1.0, `<f8` array.
    pub fn to_bytes(&self) -> Vec<u8> {
        let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
        let dims = match dims.len() {
            1 => format!("{},", dims[0]),
            _ => dims.join(", "),
        };
        let mut header = format!(
            "{{'descr': '<f8', 'fortran_order': False, 'shape': ({}), }}",
            dims
        );
        // magic + version + length, then the header, must be a multiple of 64
        let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
        header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
        header.push('\n');

        let mut out = Vec::with_capacity(unpadded + 64 + self.data.len() * 8);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&[1, 0]);
        out.extend_from_slice(&(header.len() as u16).to_le_bytes());
        out.extend_from_slice(header.as_bytes());
        for v in &self.data {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Write out as a `.npy` file to the path provided.
    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<(), NpyError> {
        fs::write(path, self.to_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handmade(descr: &str, shape: &str, data: &[u8]) -> Vec<u8> {
        let header = format!(
            "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}          \n",
            descr, shape
        );
        let mut out = MAGIC.to_vec();
        out.extend_from_slice(&[1, 0]);
        out.extend_from_slice(&(header.len() as u16).to_le_bytes());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn header_grammar() {
        let h = parse_header("{'descr': '<f4', 'fortran_order': False, 'shape': (3, 64, 64), }  \n")
            .unwrap();
        assert_eq!(h.dtype, Dtype::F4);
        assert!(!h.fortran_order);
        assert_eq!(h.shape, vec![3, 64, 64]);

        let h = parse_header("{'descr': '<i8', 'fortran_order': True, 'shape': (5,), }").unwrap();
        assert_eq!(h.shape, vec![5]);
        assert!(h.fortran_order);

        let h = parse_header("{'descr': '|u1', 'fortran_order': False, 'shape': ()}").unwrap();
        assert_eq!(h.shape, Vec::<usize>::new());
    }

    #[test]
    fn header_rejects_junk() {
        assert!(matches!(
            parse_header("{'descr': '>f4', 'fortran_order': False, 'shape': (1,), }"),
            Err(NpyError::UnsupportedDtype(_))
        ));
        assert!(matches!(
            parse_header("{'descr': '<f4', 'shape': (1,), }"),
            Err(NpyError::BadHeader(_))
        ));
        assert!(matches!(parse_header("not a dict"), Err(NpyError::BadHeader(_))));
    }

    #[test]
    fn reads_i64_labels() {
        let data: Vec<u8> = [0i64, 1, 1, 0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let arr = NpyArray::from_bytes(&handmade("<i8", "(4,)", &data)).unwrap();
        assert_eq!(arr.shape, vec![4]);
        assert_eq!(arr.data, vec![0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn reads_f32_features() {
        let data: Vec<u8> = [-1.5f32, 2.25, 0.0, 8.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let arr = NpyArray::from_bytes(&handmade("<f4", "(1, 2, 2)", &data)).unwrap();
        assert_eq!(arr.shape, vec![1, 2, 2]);
        assert_eq!(arr.data, vec![-1.5, 2.25, 0.0, 8.0]);
    }

    #[test]
    fn detects_truncation_and_garbage() {
        let data = [0u8; 3];
        assert!(matches!(
            NpyArray::from_bytes(&handmade("<f4", "(1,)", &data)),
            Err(NpyError::Truncated {
                expected: 4,
                found: 3
            })
        ));
        assert!(matches!(
            NpyArray::from_bytes(b"PK\x03\x04 definitely a zip"),
            Err(NpyError::BadPreamble)
        ));
    }

    #[test]
    fn oversized_shape_is_an_error() {
        let shape = "(4294967296, 4294967296, 4294967296)";
        assert!(matches!(
            NpyArray::from_bytes(&handmade("<f8", shape, &[0u8; 16])),
            Err(NpyError::BadHeader(_))
        ));
    }

    #[test]
    fn writes_aligned_files_we_can_read() {
        let arr = NpyArray {
            shape: vec![2, 3],
            data: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        };
        let bytes = arr.to_bytes();
        assert_eq!((bytes.len() - 6 * 8) % 64, 0);
        assert_eq!(NpyArray::from_bytes(&bytes).unwrap(), arr);

        let tempfile = tempfile::NamedTempFile::new().unwrap();
        let vector = NpyArray {
            shape: vec![3],
            data: vec![0.0, 1.0, 0.0],
        };
        vector.to_path(tempfile.path()).unwrap();
        assert_eq!(NpyArray::from_path(tempfile.path()).unwrap(), vector);
    }
}
