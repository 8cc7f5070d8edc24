#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("read past end of packet: needed {needed} bits, {available} available")]
    EndOfPacket { needed: usize, available: usize },
}

/// Fixed-size numeric types that can be written to a packet byte-for-byte,
/// always in little-endian order.
pub trait ByteValue: Copy {
    const SIZE: usize;

    fn write_le(&self, out: &mut [u8]);
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_byte_value {
    ($($ty:ty),*) => {
        $(
            impl ByteValue for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn write_le(&self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_byte_value!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

/// A growable bit buffer with independent write and read cursors.
///
/// Bits are laid out least-significant first inside each byte, so eight
/// consecutive `write_bit` calls fill exactly one byte.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    buffer: Vec<u8>,
    write_head: usize,
    read_head: usize,
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let buffer = bytes.into();
        let write_head = buffer.len() * 8;
        Self {
            buffer,
            write_head,
            read_head: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn len_bits(&self) -> usize {
        self.write_head
    }

    pub fn len_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.write_head == 0
    }

    pub fn remaining_bits(&self) -> usize {
        self.write_head - self.read_head
    }

    pub fn reset_read(&mut self) {
        self.read_head = 0;
    }

    pub fn write_bit(&mut self, bit: bool) {
        let byte = self.write_head / 8;
        if byte == self.buffer.len() {
            self.buffer.push(0);
        }
        if bit {
            self.buffer[byte] |= 1 << (self.write_head % 8);
        }
        self.write_head += 1;
    }

    /// Writes the low `count` bits of `value`. Higher bits are discarded.
    pub fn write_bits(&mut self, value: u64, count: u32) {
        debug_assert!(count <= 64);
        for i in 0..count {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    pub fn write_byte(&mut self, byte: u8) {
        if self.write_head % 8 == 0 {
            self.buffer.push(byte);
            self.write_head += 8;
        } else {
            self.write_bits(u64::from(byte), 8);
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.write_head % 8 == 0 {
            self.buffer.extend_from_slice(bytes);
            self.write_head += bytes.len() * 8;
        } else {
            for &byte in bytes {
                self.write_byte(byte);
            }
        }
    }

    pub fn write_value<T: ByteValue>(&mut self, value: T) {
        let mut raw = [0u8; 8];
        value.write_le(&mut raw[..T::SIZE]);
        self.write_bytes(&raw[..T::SIZE]);
    }

    fn ensure(&self, bits: usize) -> Result<(), PacketError> {
        let available = self.remaining_bits();
        if bits > available {
            return Err(PacketError::EndOfPacket {
                needed: bits,
                available,
            });
        }
        Ok(())
    }

    pub fn read_bit(&mut self) -> Result<bool, PacketError> {
        self.ensure(1)?;
        let bit = (self.buffer[self.read_head / 8] >> (self.read_head % 8)) & 1 == 1;
        self.read_head += 1;
        Ok(bit)
    }

    pub fn read_bits(&mut self, count: u32) -> Result<u64, PacketError> {
        debug_assert!(count <= 64);
        self.ensure(count as usize)?;
        let mut value = 0u64;
        for i in 0..count {
            if self.read_bit()? {
                value |= 1 << i;
            }
        }
        Ok(value)
    }

    pub fn read_byte(&mut self) -> Result<u8, PacketError> {
        self.ensure(8)?;
        if self.read_head % 8 == 0 {
            let byte = self.buffer[self.read_head / 8];
            self.read_head += 8;
            Ok(byte)
        } else {
            Ok(self.read_bits(8)? as u8)
        }
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, PacketError> {
        self.ensure(len * 8)?;
        if self.read_head % 8 == 0 {
            let start = self.read_head / 8;
            self.read_head += len * 8;
            Ok(self.buffer[start..start + len].to_vec())
        } else {
            (0..len).map(|_| self.read_byte()).collect()
        }
    }

    pub fn read_value<T: ByteValue>(&mut self) -> Result<T, PacketError> {
        self.ensure(T::SIZE * 8)?;
        let mut raw = [0u8; 8];
        for slot in raw.iter_mut().take(T::SIZE) {
            *slot = self.read_byte()?;
        }
        Ok(T::read_le(&raw[..T::SIZE]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_bits_share_a_byte() {
        let mut packet = Packet::new();
        for i in 0..8 {
            packet.write_bit(i % 3 == 0);
        }
        assert_eq!(packet.len_bytes(), 1);
        assert_eq!(packet.len_bits(), 8);

        packet.write_bit(true);
        assert_eq!(packet.len_bytes(), 2);
    }

    #[test]
    fn cursors_are_independent() {
        let mut packet = Packet::new();
        packet.write_value(7u16);
        assert_eq!(packet.read_value::<u16>().unwrap(), 7);

        packet.write_byte(9);
        assert_eq!(packet.read_byte().unwrap(), 9);

        packet.reset_read();
        assert_eq!(packet.read_value::<u16>().unwrap(), 7);
        assert_eq!(packet.read_byte().unwrap(), 9);
    }

    #[test]
    fn unaligned_values_survive() {
        let mut packet = Packet::new();
        packet.write_bit(true);
        packet.write_bits(0b101, 3);
        packet.write_value(-12345i32);
        packet.write_value(1.5f64);
        packet.write_bytes(b"sky");

        assert!(packet.read_bit().unwrap());
        assert_eq!(packet.read_bits(3).unwrap(), 0b101);
        assert_eq!(packet.read_value::<i32>().unwrap(), -12345);
        assert_eq!(packet.read_value::<f64>().unwrap(), 1.5);
        assert_eq!(packet.read_bytes(3).unwrap(), b"sky".to_vec());
        assert_eq!(packet.remaining_bits(), 0);
    }

    #[test]
    fn little_endian_on_the_wire() {
        let mut packet = Packet::new();
        packet.write_value(0x0102_0304u32);
        assert_eq!(packet.as_bytes(), &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn read_past_end_is_an_error() {
        let mut packet = Packet::new();
        packet.write_bits(0b11, 2);

        assert_eq!(
            packet.read_byte(),
            Err(PacketError::EndOfPacket {
                needed: 8,
                available: 2
            })
        );
        // A failed read does not move the cursor.
        assert_eq!(packet.read_bits(2).unwrap(), 0b11);
        assert!(packet.read_bit().is_err());
        assert!(packet.read_value::<u64>().is_err());
    }

    #[test]
    fn from_bytes_reads_whole_bytes() {
        let mut packet = Packet::from_bytes(vec![0xff, 0x00]);
        assert_eq!(packet.len_bits(), 16);
        assert_eq!(packet.read_bits(4).unwrap(), 0xf);
        assert_eq!(packet.read_byte().unwrap(), 0x0f);
        assert_eq!(packet.remaining_bits(), 4);
    }
}
