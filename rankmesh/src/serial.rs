//! Serial trait for payloads that cross the rank boundary.

/// Marker trait for types that can be shipped between ranks as raw
/// bytes.
///
/// # Safety
///
/// Implementing types must be trivially copyable with a fixed in-memory
/// layout: no pointers, references, heap handles, or drop glue. A
/// value's bytes are copied out on the sending rank and reinterpreted
/// on the receiving rank of the same process.
pub unsafe trait Serial: Copy + Send + 'static {}

unsafe impl Serial for u8 {}
unsafe impl Serial for u16 {}
unsafe impl Serial for u32 {}
unsafe impl Serial for u64 {}
unsafe impl Serial for u128 {}
unsafe impl Serial for usize {}
unsafe impl Serial for i8 {}
unsafe impl Serial for i16 {}
unsafe impl Serial for i32 {}
unsafe impl Serial for i64 {}
unsafe impl Serial for i128 {}
unsafe impl Serial for isize {}
unsafe impl Serial for f32 {}
unsafe impl Serial for f64 {}
unsafe impl Serial for bool {}
unsafe impl Serial for char {}
unsafe impl<T: Serial, const N: usize> Serial for [T; N] {}
unsafe impl<A: Serial, B: Serial> Serial for (A, B) {}
unsafe impl<A: Serial, B: Serial, C: Serial> Serial for (A, B, C) {}
unsafe impl<A: Serial, B: Serial, C: Serial, D: Serial> Serial for (A, B, C, D) {}

/// Copy a typed slice into an owned byte buffer.
pub(crate) fn to_bytes<T: Serial>(data: &[T]) -> Vec<u8> {
    let size = std::mem::size_of::<T>();
    assert!(size > 0, "zero-sized payloads cannot cross the rank boundary");
    let mut out = vec![0u8; data.len() * size];
    unsafe {
        std::ptr::copy_nonoverlapping(data.as_ptr() as *const u8, out.as_mut_ptr(), out.len());
    }
    out
}

/// Reinterpret a byte buffer as a typed vector. The buffer length must
/// be a whole number of elements.
pub(crate) fn from_bytes<T: Serial>(bytes: &[u8]) -> Vec<T> {
    let size = std::mem::size_of::<T>();
    assert!(size > 0, "zero-sized payloads cannot cross the rank boundary");
    assert!(
        bytes.len() % size == 0,
        "byte length {} is not a multiple of element size {}",
        bytes.len(),
        size
    );
    let len = bytes.len() / size;
    let mut out: Vec<T> = Vec::with_capacity(len);
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), out.as_mut_ptr() as *mut u8, bytes.len());
        out.set_len(len);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_primitives() {
        let data = [1u64, 2, 3, u64::MAX];
        let bytes = to_bytes(&data);
        assert_eq!(bytes.len(), 32);
        let back: Vec<u64> = from_bytes(&bytes);
        assert_eq!(back, data);
    }

    #[test]
    fn round_trips_pairs() {
        let data = [(1u32, -7i64), (42, 0)];
        let back: Vec<(u32, i64)> = from_bytes(&to_bytes(&data));
        assert_eq!(back, data);
    }

    #[test]
    fn empty_slice() {
        let back: Vec<u16> = from_bytes(&to_bytes::<u16>(&[]));
        assert!(back.is_empty());
    }

    #[test]
    #[should_panic(expected = "not a multiple")]
    fn rejects_ragged_buffers() {
        let _: Vec<u32> = from_bytes(&[0u8; 7]);
    }
}
