// Checkpoint — Save and load module parameters
//
// Binary checkpoint format (.wren):
//
//   Header:
//     magic:   [u8; 4]  = b"WREN"
//     version: u32 LE   = 1
//     count:   u32 LE   = number of tensors
//
//   For each tensor:
//     key_len:  u32 LE
//     key:      [u8; key_len]  (UTF-8 dotted parameter name, e.g. "fc1.weight")
//     dtype:    u8             (0=F32, 1=I32, 2=Bool)
//     ndim:     u32 LE
//     dims:     [u32 LE; ndim]
//     data_len: u64 LE         (in bytes)
//     data:     [u8; data_len] (raw little-endian typed data, one byte per bool)
//
// Usage:
//   // Save
//   checkpoint::save_module("model.wren", &model)?;
//   checkpoint::save("weights.wren", &state_dict)?;
//
//   // Load
//   checkpoint::load_module("model.wren", &model)?;
//   let state_dict = checkpoint::load("weights.wren")?;

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use wren_core::{DType, Error, Result, Size, Storage};
use wren_nn::{Module, StateDict};

// Constants

const MAGIC: &[u8; 4] = b"WREN";
const VERSION: u32 = 1;

// DType <-> u8 encoding

fn dtype_to_u8(dtype: DType) -> u8 {
    match dtype {
        DType::F32 => 0,
        DType::I32 => 1,
        DType::Bool => 2,
    }
}

fn u8_to_dtype(v: u8) -> Result<DType> {
    match v {
        0 => Ok(DType::F32),
        1 => Ok(DType::I32),
        2 => Ok(DType::Bool),
        _ => Err(Error::msg(format!("Unknown dtype tag: {v}"))),
    }
}

// Raw bytes <-> storage

fn storage_to_bytes(storage: &Storage) -> Vec<u8> {
    match storage {
        Storage::F32(data) => data.iter().flat_map(|v| v.to_le_bytes()).collect(),
        Storage::I32(data) => data.iter().flat_map(|v| v.to_le_bytes()).collect(),
        Storage::Bool(data) => data.iter().map(|&v| v as u8).collect(),
    }
}

fn storage_from_bytes(bytes: &[u8], dtype: DType) -> Storage {
    match dtype {
        DType::F32 => Storage::F32(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        DType::I32 => Storage::I32(
            bytes
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        DType::Bool => Storage::Bool(bytes.iter().map(|&b| b != 0).collect()),
    }
}

// Low-level IO helpers

fn write_u8(w: &mut impl Write, v: u8) -> std::io::Result<()> {
    w.write_all(&[v])
}

fn write_u32(w: &mut impl Write, v: u32) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u64(w: &mut impl Write, v: u64) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_u8(r: &mut impl Read) -> std::io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32(r: &mut impl Read) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

// Lengths come from the file, so the buffer only grows as bytes arrive.
fn read_bytes(r: &mut impl Read, len: u64) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    r.by_ref().take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("expected {len} bytes, got {}", buf.len()),
        ));
    }
    Ok(buf)
}

fn io_err(e: std::io::Error) -> Error {
    Error::msg(format!("IO error: {e}"))
}

fn to_u32(v: usize, what: &str) -> Result<u32> {
    u32::try_from(v).map_err(|_| Error::msg(format!("{what} too large for checkpoint: {v}")))
}

// Write checkpoint

/// Write a state dict to a writer in the Wren checkpoint format.
pub fn write_checkpoint(writer: &mut impl Write, dict: &StateDict) -> Result<()> {
    // Header
    writer.write_all(MAGIC).map_err(io_err)?;
    write_u32(writer, VERSION).map_err(io_err)?;
    write_u32(writer, to_u32(dict.len(), "tensor count")?).map_err(io_err)?;

    // Each tensor
    for entry in dict {
        let key_bytes = entry.name().as_bytes();
        write_u32(writer, to_u32(key_bytes.len(), "key length")?).map_err(io_err)?;
        writer.write_all(key_bytes).map_err(io_err)?;

        write_u8(writer, dtype_to_u8(entry.dtype())).map_err(io_err)?;

        let dims = entry.shape().dims();
        write_u32(writer, dims.len() as u32).map_err(io_err)?;
        for &d in dims {
            write_u32(writer, to_u32(d, "dimension")?).map_err(io_err)?;
        }

        let data = storage_to_bytes(entry.storage());
        write_u64(writer, data.len() as u64).map_err(io_err)?;
        writer.write_all(&data).map_err(io_err)?;
    }

    log::debug!("wrote checkpoint with {} tensors", dict.len());
    Ok(())
}

// Read checkpoint

/// Read a state dict from a reader in the Wren checkpoint format.
pub fn read_checkpoint(reader: &mut impl Read) -> Result<StateDict> {
    // Header
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(io_err)?;
    if &magic != MAGIC {
        return Err(Error::msg(format!(
            "Invalid checkpoint: expected magic {:?}, got {:?}",
            MAGIC, magic
        )));
    }

    let version = read_u32(reader).map_err(io_err)?;
    if version != VERSION {
        return Err(Error::msg(format!(
            "Unsupported checkpoint version: {} (expected {})",
            version, VERSION
        )));
    }

    let count = read_u32(reader).map_err(io_err)? as usize;
    let mut dict = StateDict::new();

    for _ in 0..count {
        let key_len = u64::from(read_u32(reader).map_err(io_err)?);
        let key_bytes = read_bytes(reader, key_len).map_err(io_err)?;
        let key = String::from_utf8(key_bytes)
            .map_err(|e| Error::msg(format!("Invalid UTF-8 key: {e}")))?;

        let dtype = u8_to_dtype(read_u8(reader).map_err(io_err)?)?;

        let ndim = read_u32(reader).map_err(io_err)? as usize;
        let mut dims = Vec::with_capacity(ndim.min(wren_core::MAX_RANK));
        for _ in 0..ndim {
            dims.push(read_u32(reader).map_err(io_err)? as usize);
        }
        let shape = Size::new(&dims)?;

        let data_len = read_u64(reader).map_err(io_err)?;
        let expected = shape
            .numel()
            .checked_mul(dtype.size_in_bytes())
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| {
                Error::msg(format!(
                    "Corrupt checkpoint entry {key}: shape {shape} of {dtype} is too large"
                ))
            })?;
        if data_len != expected {
            wren_core::bail!(
                "Corrupt checkpoint entry {key}: {data_len} data bytes, shape {shape} of {dtype} needs {expected}"
            );
        }
        let data = read_bytes(reader, data_len).map_err(io_err)?;

        dict.insert(key, shape, storage_from_bytes(&data, dtype))?;
    }

    log::debug!("read checkpoint with {} tensors", dict.len());
    Ok(dict)
}

// High-level API — save/load state dicts

/// Save a state dict to a file.
///
/// ```rust,no_run
/// use wren::checkpoint;
/// use wren::prelude::*;
///
/// let mut dict = StateDict::new();
/// dict.insert("w", Size::new([2, 3])?, Storage::zeros(6, DType::F32))?;
/// checkpoint::save("weights.wren", &dict)?;
/// # Ok::<(), wren::Error>(())
/// ```
pub fn save(path: impl AsRef<Path>, dict: &StateDict) -> Result<()> {
    let file = File::create(path.as_ref()).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    write_checkpoint(&mut writer, dict)?;
    writer.flush().map_err(io_err)?;
    Ok(())
}

/// Load a state dict from a file.
///
/// ```rust,no_run
/// use wren::checkpoint;
///
/// let dict = checkpoint::load("weights.wren")?;
/// for entry in &dict {
///     println!("{}: {}", entry.name(), entry.shape());
/// }
/// # Ok::<(), wren::Error>(())
/// ```
pub fn load(path: impl AsRef<Path>) -> Result<StateDict> {
    let file = File::open(path.as_ref()).map_err(io_err)?;
    let mut reader = BufReader::new(file);
    read_checkpoint(&mut reader)
}

// High-level API — save/load module parameters

/// Save all parameters of a module to a checkpoint file.
pub fn save_module(path: impl AsRef<Path>, module: &impl Module) -> Result<()> {
    save(path, &module.state_dict()?)
}

/// Load parameters from a checkpoint file into a module.
///
/// The file must name exactly the module's parameters with matching shapes
/// and dtypes; see [`Module::load_state_dict`].
pub fn load_module(path: impl AsRef<Path>, module: &impl Module) -> Result<()> {
    let dict = load(path)?;
    module.load_state_dict(&dict)
}

// In-memory checkpoint (for testing and transfer)

/// Serialize a state dict to an in-memory byte vector.
pub fn to_bytes(dict: &StateDict) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_checkpoint(&mut buf, dict)?;
    Ok(buf)
}

/// Deserialize a state dict from an in-memory byte slice.
pub fn from_bytes(data: &[u8]) -> Result<StateDict> {
    let mut cursor = std::io::Cursor::new(data);
    read_checkpoint(&mut cursor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StateDict {
        let mut dict = StateDict::new();
        dict.insert(
            "fc1.weight",
            Size::new([2, 2]).unwrap(),
            Storage::from_vec(vec![1.5f32, -2.0, 0.25, 8.0]),
        )
        .unwrap();
        dict.insert("steps", Size::scalar(), Storage::from_vec(vec![-7i32]))
            .unwrap();
        dict.insert(
            "mask",
            Size::new([3]).unwrap(),
            Storage::from_vec(vec![true, false, true]),
        )
        .unwrap();
        dict
    }

    #[test]
    fn test_header_layout() {
        let bytes = to_bytes(&StateDict::new()).unwrap();
        assert_eq!(&bytes[0..4], b"WREN");
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &0u32.to_le_bytes());
        assert_eq!(bytes.len(), 12);
    }

    #[test]
    fn test_entry_layout() {
        let mut dict = StateDict::new();
        dict.insert("m", Size::new([2]).unwrap(), Storage::from_vec(vec![true, false]))
            .unwrap();
        let bytes = to_bytes(&dict).unwrap();
        let entry = &bytes[12..];
        // key_len, key, dtype tag, ndim, dims, data_len, data
        assert_eq!(&entry[0..4], &1u32.to_le_bytes());
        assert_eq!(entry[4], b'm');
        assert_eq!(entry[5], 2);
        assert_eq!(&entry[6..10], &1u32.to_le_bytes());
        assert_eq!(&entry[10..14], &2u32.to_le_bytes());
        assert_eq!(&entry[14..22], &2u64.to_le_bytes());
        assert_eq!(&entry[22..], &[1, 0]);
    }

    #[test]
    fn test_bytes_round_trip_preserves_order_and_dtypes() {
        let dict = sample();
        let restored = from_bytes(&to_bytes(&dict).unwrap()).unwrap();
        assert_eq!(restored, dict);
        let names: Vec<&str> = restored.names().collect();
        assert_eq!(names, ["fc1.weight", "steps", "mask"]);
    }

    #[test]
    fn test_rejects_bad_magic_and_version() {
        let mut bytes = to_bytes(&sample()).unwrap();
        bytes[0] = b'X';
        assert!(from_bytes(&bytes).is_err());

        let mut bytes = to_bytes(&sample()).unwrap();
        bytes[4..8].copy_from_slice(&2u32.to_le_bytes());
        let err = from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_rejects_truncated_and_bad_tag() {
        let bytes = to_bytes(&sample()).unwrap();
        assert!(from_bytes(&bytes[..bytes.len() - 1]).is_err());

        let mut dict = StateDict::new();
        dict.insert("x", Size::scalar(), Storage::zeros(1, DType::F32))
            .unwrap();
        let mut bytes = to_bytes(&dict).unwrap();
        // header (12) + key_len (4) + key (1)
        bytes[17] = 9;
        assert!(from_bytes(&bytes).unwrap_err().to_string().contains("dtype tag"));
    }

    #[test]
    fn test_rejects_inconsistent_data_len() {
        let mut dict = StateDict::new();
        dict.insert("x", Size::new([2]).unwrap(), Storage::zeros(2, DType::I32))
            .unwrap();
        let mut bytes = to_bytes(&dict).unwrap();
        // header (12) + key_len (4) + key (1) + tag (1) + ndim (4) + dim (4)
        bytes[26..34].copy_from_slice(&4u64.to_le_bytes());
        assert!(from_bytes(&bytes).is_err());
    }

    /// One f32 entry named "x" with the given dims, data_len and payload.
    fn raw_entry(dims: &[u32], data_len: u64, data: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"WREN");
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(b'x');
        bytes.push(0);
        bytes.extend_from_slice(&(dims.len() as u32).to_le_bytes());
        for d in dims {
            bytes.extend_from_slice(&d.to_le_bytes());
        }
        bytes.extend_from_slice(&data_len.to_le_bytes());
        bytes.extend_from_slice(data);
        bytes
    }

    #[test]
    fn test_raw_entry_matches_writer() {
        let mut dict = StateDict::new();
        dict.insert("x", Size::new([1]).unwrap(), Storage::from_vec(vec![2.5f32]))
            .unwrap();
        let expected = to_bytes(&dict).unwrap();
        assert_eq!(raw_entry(&[1], 4, &2.5f32.to_le_bytes()), expected);
    }

    #[test]
    fn test_rejects_overflowing_shape() {
        let bytes = raw_entry(&[u32::MAX; 3], 0, &[]);
        assert!(from_bytes(&bytes).is_err());
        if usize::BITS == 64 {
            assert!(matches!(
                from_bytes(&bytes),
                Err(Error::NumelOverflow { .. })
            ));
        }
    }

    #[test]
    fn test_rejects_overflowing_byte_count() {
        // numel fits in a 64-bit usize, numel * 4 does not
        let bytes = raw_entry(&[u32::MAX, u32::MAX], 0, &[]);
        let err = from_bytes(&bytes).unwrap_err();
        if usize::BITS == 64 {
            assert!(err.to_string().contains("too large"));
        }
    }

    #[test]
    fn test_huge_lengths_fail_without_allocating() {
        // key_len claims 4 GiB, two bytes follow
        let mut bytes = to_bytes(&StateDict::new()).unwrap();
        bytes[8..12].copy_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(b"ab");
        assert!(from_bytes(&bytes).unwrap_err().to_string().contains("IO error"));

        // data_len matches a 4 TiB shape, no payload follows
        let bytes = raw_entry(&[1 << 20, 1 << 20], 4 << 40, &[]);
        assert!(from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_rejects_zero_extent() {
        let mut dict = StateDict::new();
        dict.insert("x", Size::new([1]).unwrap(), Storage::zeros(1, DType::F32))
            .unwrap();
        let mut bytes = to_bytes(&dict).unwrap();
        bytes[22..26].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            from_bytes(&bytes),
            Err(Error::InvalidExtent { axis: 0, extent: 0 })
        ));
    }
}
