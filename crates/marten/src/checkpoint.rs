use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use marten_core::{DType, Error, FloatScalar, Mat, Result, Scalar};

// Checkpoint — Save and load parameters as dense little-endian blobs
//
// One file per parameter, named by its position in the model's
// `parameters()` order. Each file is a self-describing dense array:
//
//   rank:          u32 LE
//   shape:         u32 LE × rank
//   dtype:         u8      (0=F32, 1=F64, 2=I32)
//   fortran_order: u8      (always 0 — data is row-major)
//   data:          raw LE elements, row-major
//
// Loading validates shape and dtype against the receiving parameter, so a
// model restored with the wrong architecture fails loudly instead of
// silently reinterpreting bytes.

fn dtype_to_u8(dtype: DType) -> u8 {
    match dtype {
        DType::F32 => 0,
        DType::F64 => 1,
        DType::I32 => 2,
    }
}

fn u8_to_dtype(v: u8) -> Result<DType> {
    match v {
        0 => Ok(DType::F32),
        1 => Ok(DType::F64),
        2 => Ok(DType::I32),
        _ => Err(Error::msg(format!("unknown dtype tag: {}", v))),
    }
}

fn io_err(e: std::io::Error) -> Error {
    Error::msg(format!("io error: {}", e))
}

fn write_u32(w: &mut impl Write, v: u32) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_u32(r: &mut impl Read) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u8(r: &mut impl Read) -> std::io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

/// Serialize one parameter's values into `writer`.
pub fn write_tensor<R: Scalar>(writer: &mut impl Write, shape: &[usize], values: &[R]) -> Result<()> {
    write_u32(writer, shape.len() as u32).map_err(io_err)?;
    for &d in shape {
        write_u32(writer, d as u32).map_err(io_err)?;
    }
    writer
        .write_all(&[dtype_to_u8(R::DTYPE), 0u8])
        .map_err(io_err)?;
    for &v in values {
        match R::DTYPE {
            DType::F32 => writer
                .write_all(&(v.to_f64() as f32).to_le_bytes())
                .map_err(io_err)?,
            DType::F64 => writer.write_all(&v.to_f64().to_le_bytes()).map_err(io_err)?,
            DType::I32 => writer
                .write_all(&(v.to_f64() as i32).to_le_bytes())
                .map_err(io_err)?,
        }
    }
    Ok(())
}

/// Read one tensor blob: `(shape, values)`. The element type must match.
pub fn read_tensor<R: Scalar>(reader: &mut impl Read) -> Result<(Vec<usize>, Vec<R>)> {
    let rank = read_u32(reader).map_err(io_err)? as usize;
    let mut shape = Vec::with_capacity(rank);
    for _ in 0..rank {
        shape.push(read_u32(reader).map_err(io_err)? as usize);
    }
    let dtype = u8_to_dtype(read_u8(reader).map_err(io_err)?)?;
    if dtype != R::DTYPE {
        return Err(Error::msg(format!(
            "tensor stores {} but {} was requested",
            dtype,
            R::DTYPE
        )));
    }
    let fortran_order = read_u8(reader).map_err(io_err)?;
    if fortran_order != 0 {
        return Err(Error::msg("fortran-order tensors are not supported"));
    }

    let count: usize = shape.iter().product::<usize>().max(1);
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let v = match dtype {
            DType::F32 => {
                let mut b = [0u8; 4];
                reader.read_exact(&mut b).map_err(io_err)?;
                f32::from_le_bytes(b) as f64
            }
            DType::F64 => {
                let mut b = [0u8; 8];
                reader.read_exact(&mut b).map_err(io_err)?;
                f64::from_le_bytes(b)
            }
            DType::I32 => {
                let mut b = [0u8; 4];
                reader.read_exact(&mut b).map_err(io_err)?;
                i32::from_le_bytes(b) as f64
            }
        };
        values.push(R::from_f64(v));
    }
    Ok((shape, values))
}

fn tensor_path(dir: &Path, index: usize) -> std::path::PathBuf {
    dir.join(format!("param_{:04}.tensor", index))
}

/// Save every parameter to `dir`, one blob file each, in list order.
pub fn save_parameters<R: FloatScalar>(dir: impl AsRef<Path>, params: &[Mat<R>]) -> Result<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir).map_err(io_err)?;
    for (i, p) in params.iter().enumerate() {
        let file = File::create(tensor_path(dir, i)).map_err(io_err)?;
        let mut w = BufWriter::new(file);
        let values = p.w().to_vec()?;
        write_tensor(&mut w, p.shape(), &values)?;
    }
    Ok(())
}

/// Load blobs from `dir` into the given parameters, in list order.
/// Shapes must match exactly.
pub fn load_parameters<R: FloatScalar>(dir: impl AsRef<Path>, params: &[Mat<R>]) -> Result<()> {
    let dir = dir.as_ref();
    for (i, p) in params.iter().enumerate() {
        let file = File::open(tensor_path(dir, i)).map_err(io_err)?;
        let mut r = BufReader::new(file);
        let (shape, values) = read_tensor::<R>(&mut r)?;
        if shape != p.shape() {
            return Err(Error::ShapeMismatch {
                op: "load_parameters",
                lhs: p.shape().to_vec(),
                rhs: shape,
            });
        }
        p.w().write_values(&values)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_blob_roundtrip() {
        let mut buf = Vec::new();
        let values: Vec<f64> = (0..6).map(|v| v as f64 * 0.5).collect();
        write_tensor(&mut buf, &[2, 3], &values).unwrap();
        let (shape, back) = read_tensor::<f64>(&mut buf.as_slice()).unwrap();
        assert_eq!(shape, vec![2, 3]);
        assert_eq!(back, values);
    }

    #[test]
    fn dtype_mismatch_is_detected() {
        let mut buf = Vec::new();
        write_tensor(&mut buf, &[2], &[1.0f32, 2.0]).unwrap();
        assert!(read_tensor::<f64>(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn parameter_directory_roundtrip() {
        let dir = std::env::temp_dir().join("marten-checkpoint-test");
        let a = Mat::<f32>::uniform(3, 4, -1.0, 1.0).unwrap();
        let b = Mat::<f32>::uniform(4, 1, -1.0, 1.0).unwrap();
        save_parameters(&dir, &[a.clone(), b.clone()]).unwrap();

        let a2 = Mat::<f32>::zeros(3, 4).unwrap();
        let b2 = Mat::<f32>::zeros(4, 1).unwrap();
        load_parameters(&dir, &[a2.clone(), b2.clone()]).unwrap();
        assert_eq!(a.w().to_vec().unwrap(), a2.w().to_vec().unwrap());
        assert_eq!(b.w().to_vec().unwrap(), b2.w().to_vec().unwrap());

        // wrong shape refuses to load
        let wrong = Mat::<f32>::zeros(4, 3).unwrap();
        assert!(load_parameters(&dir, &[wrong]).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
