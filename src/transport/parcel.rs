//! Flat message buffer carried over the channel
//!
//! A [`Parcel`] is written front to back and read back with a cursor in the
//! same order. Primitives are little-endian; strings are length-prefixed
//! UTF-16 padded to four bytes. Binder references are not inlined: the buffer
//! stores an index into a side table of objects, the same way the platform
//! channel keeps object offsets next to the raw data.

use std::fmt;
use std::sync::Arc;

use super::binder::Binder;

/// Strict-mode header written in front of every interface token
const STRICT_MODE_HEADER: i32 = 0x0001_0000;

/// Structural decode failures. Any of these aborts the decode of one message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParcelError {
    #[error("unexpected end of message: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("invalid element count: {0}")]
    InvalidCount(i32),

    #[error("duplicate axis {0} in motion event")]
    DuplicateAxis(i32),

    #[error("string is not valid UTF-16")]
    InvalidString,

    #[error("unexpected null {0}")]
    NullObject(&'static str),

    #[error("invalid value {value} for {field}")]
    InvalidValue { field: &'static str, value: i32 },

    #[error("missing binder object at index {0}")]
    MissingObject(i32),
}

/// Types with a fixed wire layout inside a parcel
pub trait Parcelable: Sized {
    fn write_to(&self, parcel: &mut Parcel);
    fn read_from(parcel: &mut Parcel) -> Result<Self, ParcelError>;
}

#[derive(Default, Clone)]
pub struct Parcel {
    data: Vec<u8>,
    position: usize,
    objects: Vec<Arc<dyn Binder>>,
}

impl fmt::Debug for Parcel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parcel")
            .field("len", &self.data.len())
            .field("position", &self.position)
            .field("objects", &self.objects.len())
            .finish()
    }
}

impl Parcel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a parcel positioned at the start of `data`
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            position: 0,
            objects: Vec::new(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Moves the read cursor back to the start
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    pub fn objects(&self) -> &[Arc<dyn Binder>] {
        &self.objects
    }

    /// Replaces every carried binder reference, keeping their indices
    pub fn map_objects<F>(&mut self, f: F)
    where
        F: FnMut(Arc<dyn Binder>) -> Arc<dyn Binder>,
    {
        self.objects = std::mem::take(&mut self.objects)
            .into_iter()
            .map(f)
            .collect();
    }

    pub fn write<T: Parcelable>(&mut self, value: &T) {
        value.write_to(self);
    }

    pub fn read<T: Parcelable>(&mut self) -> Result<T, ParcelError> {
        T::read_from(self)
    }

    pub fn write_i32(&mut self, value: i32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes the raw IEEE-754 bits so NaN payloads and signed zeros survive
    pub fn write_f32(&mut self, value: f32) {
        self.data.extend_from_slice(&value.to_bits().to_le_bytes());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_i32(i32::from(value));
    }

    pub fn write_string(&mut self, value: Option<&str>) {
        let Some(value) = value else {
            self.write_i32(-1);
            return;
        };
        let units: Vec<u16> = value.encode_utf16().collect();
        self.write_i32(units.len() as i32);
        for unit in units {
            self.data.extend_from_slice(&unit.to_le_bytes());
        }
        self.data.extend_from_slice(&[0, 0]);
        self.pad();
    }

    pub fn write_binder(&mut self, binder: Arc<dyn Binder>) {
        let index = self.objects.len() as i32;
        self.objects.push(binder);
        self.write_i32(index);
    }

    pub fn write_interface_token(&mut self, descriptor: &str) {
        self.write_i32(STRICT_MODE_HEADER);
        self.write_string(Some(descriptor));
    }

    /// Reply header for a call that completed normally
    pub fn write_no_exception(&mut self) {
        self.write_i32(0);
    }

    pub fn write_exception(&mut self, code: i32, message: &str) {
        self.write_i32(code);
        self.write_string(Some(message));
    }

    /// Writes an optional parcelable behind a presence marker
    pub fn write_nullable<T: Parcelable>(&mut self, value: Option<&T>) {
        match value {
            Some(value) => {
                self.write_i32(1);
                value.write_to(self);
            }
            None => self.write_i32(0),
        }
    }

    pub fn read_i32(&mut self) -> Result<i32, ParcelError> {
        let bytes = self.take::<4>()?;
        Ok(i32::from_le_bytes(bytes))
    }

    pub fn read_i64(&mut self) -> Result<i64, ParcelError> {
        let bytes = self.take::<8>()?;
        Ok(i64::from_le_bytes(bytes))
    }

    pub fn read_f32(&mut self) -> Result<f32, ParcelError> {
        let bytes = self.take::<4>()?;
        Ok(f32::from_bits(u32::from_le_bytes(bytes)))
    }

    pub fn read_bool(&mut self) -> Result<bool, ParcelError> {
        Ok(self.read_i32()? != 0)
    }

    pub fn read_string(&mut self) -> Result<Option<String>, ParcelError> {
        let len = self.read_i32()?;
        if len == -1 {
            return Ok(None);
        }
        if len < 0 {
            return Err(ParcelError::InvalidCount(len));
        }
        let len = len as usize;
        let byte_len = (len + 1) * 2;
        self.ensure(byte_len)?;

        let units: Vec<u16> = self.data[self.position..self.position + len * 2]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        self.position += byte_len;
        self.skip_padding();

        String::from_utf16(&units)
            .map(Some)
            .map_err(|_| ParcelError::InvalidString)
    }

    pub fn read_binder(&mut self) -> Result<Arc<dyn Binder>, ParcelError> {
        let index = self.read_i32()?;
        usize::try_from(index)
            .ok()
            .and_then(|i| self.objects.get(i))
            .cloned()
            .ok_or(ParcelError::MissingObject(index))
    }

    /// Reads the interface token and returns the descriptor it carries
    pub fn read_interface_token(&mut self) -> Result<String, ParcelError> {
        let _strict_mode = self.read_i32()?;
        self.read_string()?
            .ok_or(ParcelError::NullObject("interface token"))
    }

    /// Reads the reply header. `Ok(None)` means the call completed normally.
    pub fn read_exception(&mut self) -> Result<Option<(i32, String)>, ParcelError> {
        let code = self.read_i32()?;
        if code == 0 {
            return Ok(None);
        }
        let message = self.read_string()?.unwrap_or_default();
        Ok(Some((code, message)))
    }

    pub fn read_nullable<T: Parcelable>(&mut self) -> Result<Option<T>, ParcelError> {
        match self.read_i32()? {
            0 => Ok(None),
            _ => T::read_from(self).map(Some),
        }
    }

    /// Reads an element count for entries of `entry_size` bytes. The count
    /// must fit in what is left of the buffer, which bounds any allocation
    /// made from it.
    pub fn read_count(&mut self, entry_size: usize) -> Result<usize, ParcelError> {
        let count = self.read_i32()?;
        let n = usize::try_from(count).map_err(|_| ParcelError::InvalidCount(count))?;
        let needed = n
            .checked_mul(entry_size)
            .ok_or(ParcelError::InvalidCount(count))?;
        self.ensure(needed)?;
        Ok(n)
    }

    fn ensure(&self, needed: usize) -> Result<(), ParcelError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(ParcelError::UnexpectedEof { needed, remaining });
        }
        Ok(())
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], ParcelError> {
        self.ensure(N)?;
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.data[self.position..self.position + N]);
        self.position += N;
        Ok(bytes)
    }

    fn pad(&mut self) {
        while self.data.len() % 4 != 0 {
            self.data.push(0);
        }
    }

    fn skip_padding(&mut self) {
        while self.position % 4 != 0 && self.position < self.data.len() {
            self.position += 1;
        }
    }
}

impl Parcelable for i32 {
    fn write_to(&self, parcel: &mut Parcel) {
        parcel.write_i32(*self);
    }

    fn read_from(parcel: &mut Parcel) -> Result<Self, ParcelError> {
        parcel.read_i32()
    }
}

impl Parcelable for i64 {
    fn write_to(&self, parcel: &mut Parcel) {
        parcel.write_i64(*self);
    }

    fn read_from(parcel: &mut Parcel) -> Result<Self, ParcelError> {
        parcel.read_i64()
    }
}

impl Parcelable for f32 {
    fn write_to(&self, parcel: &mut Parcel) {
        parcel.write_f32(*self);
    }

    fn read_from(parcel: &mut Parcel) -> Result<Self, ParcelError> {
        parcel.read_f32()
    }
}

impl Parcelable for bool {
    fn write_to(&self, parcel: &mut Parcel) {
        parcel.write_bool(*self);
    }

    fn read_from(parcel: &mut Parcel) -> Result<Self, ParcelError> {
        parcel.read_bool()
    }
}

impl Parcelable for String {
    fn write_to(&self, parcel: &mut Parcel) {
        parcel.write_string(Some(self));
    }

    fn read_from(parcel: &mut Parcel) -> Result<Self, ParcelError> {
        parcel
            .read_string()?
            .ok_or(ParcelError::NullObject("string"))
    }
}
