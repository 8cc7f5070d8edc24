use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::packet::{ByteValue, Packet, PacketError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PackError {
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("invalid tag {tag} for {what}")]
    InvalidTag { what: &'static str, tag: u64 },
    #[error("string is not valid utf-8")]
    InvalidUtf8,
    #[error("declared length {len} exceeds remaining packet data")]
    LengthOverflow { len: usize },
}

type PackFn<T> = dyn Fn(&mut Packet, &T) + Send + Sync;
type UnpackFn<T> = dyn Fn(&mut Packet) -> Result<T, PackError> + Send + Sync;

/// A pack/unpack pair for one value type. Cheap to clone.
pub struct Pack<T> {
    pack_fn: Arc<PackFn<T>>,
    unpack_fn: Arc<UnpackFn<T>>,
}

impl<T> Clone for Pack<T> {
    fn clone(&self) -> Self {
        Self {
            pack_fn: Arc::clone(&self.pack_fn),
            unpack_fn: Arc::clone(&self.unpack_fn),
        }
    }
}

impl<T> fmt::Debug for Pack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pack<{}>", std::any::type_name::<T>())
    }
}

impl<T: 'static> Pack<T> {
    pub fn new(
        pack: impl Fn(&mut Packet, &T) + Send + Sync + 'static,
        unpack: impl Fn(&mut Packet) -> Result<T, PackError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            pack_fn: Arc::new(pack),
            unpack_fn: Arc::new(unpack),
        }
    }

    pub fn pack(&self, packet: &mut Packet, value: &T) {
        (self.pack_fn)(packet, value)
    }

    pub fn unpack(&self, packet: &mut Packet) -> Result<T, PackError> {
        (self.unpack_fn)(packet)
    }

    pub fn to_packet(&self, value: &T) -> Packet {
        let mut packet = Packet::new();
        self.pack(&mut packet, value);
        packet
    }

    /// Carries this rule over to a type with a lossless conversion each way.
    pub fn map<U: 'static>(
        self,
        into: impl Fn(T) -> U + Send + Sync + 'static,
        from: impl Fn(&U) -> T + Send + Sync + 'static,
    ) -> Pack<U> {
        let inner = self.clone();
        Pack::new(
            move |packet, value| inner.pack(packet, &from(value)),
            move |packet| self.unpack(packet).map(&into),
        )
    }
}

/// Enumerations packed as a fixed-width tag.
pub trait PackEnum: Sized + Copy {
    const NAME: &'static str;

    fn to_tag(self) -> u64;
    fn from_tag(tag: u64) -> Option<Self>;
}

pub fn bool_pack() -> Pack<bool> {
    Pack::new(
        |packet, value| packet.write_bit(*value),
        |packet| Ok(packet.read_bit()?),
    )
}

pub fn enum_pack<E: PackEnum + 'static>(bits: u32) -> Pack<E> {
    let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
    Pack::new(
        move |packet, value: &E| packet.write_bits(value.to_tag() & mask, bits),
        move |packet| {
            let tag = packet.read_bits(bits)? & mask;
            E::from_tag(tag).ok_or(PackError::InvalidTag { what: E::NAME, tag })
        },
    )
}

pub fn byte_pack<T: ByteValue + Send + Sync + 'static>() -> Pack<T> {
    Pack::new(
        |packet, value| packet.write_value(*value),
        |packet| Ok(packet.read_value()?),
    )
}

fn read_length(packet: &mut Packet, min_bits_each: usize) -> Result<usize, PackError> {
    let len = packet.read_value::<u32>()? as usize;
    if len.saturating_mul(min_bits_each) > packet.remaining_bits() {
        return Err(PackError::LengthOverflow { len });
    }
    Ok(len)
}

pub fn string_pack() -> Pack<String> {
    Pack::new(
        |packet, value: &String| {
            packet.write_value(value.len() as u32);
            packet.write_bytes(value.as_bytes());
        },
        |packet| {
            let len = read_length(packet, 8)?;
            let bytes = packet.read_bytes(len)?;
            String::from_utf8(bytes).map_err(|_| PackError::InvalidUtf8)
        },
    )
}

pub fn optional_pack<T: 'static>(inner: Pack<T>) -> Pack<Option<T>> {
    let unpack_inner = inner.clone();
    Pack::new(
        move |packet, value: &Option<T>| {
            packet.write_bit(value.is_some());
            if let Some(value) = value {
                inner.pack(packet, value);
            }
        },
        move |packet| {
            if packet.read_bit()? {
                Ok(Some(unpack_inner.unpack(packet)?))
            } else {
                Ok(None)
            }
        },
    )
}

pub fn list_pack<T: 'static>(inner: Pack<T>) -> Pack<Vec<T>> {
    let unpack_inner = inner.clone();
    Pack::new(
        move |packet, values: &Vec<T>| {
            packet.write_value(values.len() as u32);
            for value in values {
                inner.pack(packet, value);
            }
        },
        move |packet| {
            let len = read_length(packet, 1)?;
            let mut values = Vec::with_capacity(len);
            for _ in 0..len {
                values.push(unpack_inner.unpack(packet)?);
            }
            Ok(values)
        },
    )
}

/// Maps are written in ascending key order.
pub fn map_pack<K: Ord + 'static, V: 'static>(key: Pack<K>, value: Pack<V>) -> Pack<BTreeMap<K, V>> {
    let unpack_key = key.clone();
    let unpack_value = value.clone();
    Pack::new(
        move |packet, map: &BTreeMap<K, V>| {
            packet.write_value(map.len() as u32);
            for (k, v) in map {
                key.pack(packet, k);
                value.pack(packet, v);
            }
        },
        move |packet| {
            let len = read_length(packet, 1)?;
            let mut map = BTreeMap::new();
            for _ in 0..len {
                let k = unpack_key.unpack(packet)?;
                let v = unpack_value.unpack(packet)?;
                map.insert(k, v);
            }
            Ok(map)
        },
    )
}

pub fn pair_pack<A: 'static, B: 'static>(first: Pack<A>, second: Pack<B>) -> Pack<(A, B)> {
    let unpack_first = first.clone();
    let unpack_second = second.clone();
    Pack::new(
        move |packet, (a, b): &(A, B)| {
            first.pack(packet, a);
            second.pack(packet, b);
        },
        move |packet| Ok((unpack_first.unpack(packet)?, unpack_second.unpack(packet)?)),
    )
}

pub fn vec2_pack() -> Pack<glam::Vec2> {
    pair_pack(byte_pack::<f32>(), byte_pack::<f32>()).map(
        |(x, y)| glam::Vec2::new(x, y),
        |v| (v.x, v.y),
    )
}

struct Member<C> {
    pack: Box<dyn Fn(&mut Packet, &C) + Send + Sync>,
    unpack: Box<dyn Fn(&mut Packet, &mut C) -> Result<(), PackError> + Send + Sync>,
}

/// Record rule: members are packed and unpacked strictly in the order they
/// were declared.
pub struct ClassPack<C> {
    members: Vec<Member<C>>,
}

impl<C: Default + 'static> Default for ClassPack<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Default + 'static> ClassPack<C> {
    pub fn new() -> Self {
        Self {
            members: Vec::new(),
        }
    }

    pub fn member<M: 'static>(
        mut self,
        pack: Pack<M>,
        get: fn(&C) -> &M,
        get_mut: fn(&mut C) -> &mut M,
    ) -> Self {
        let unpack = pack.clone();
        self.members.push(Member {
            pack: Box::new(move |packet, class| pack.pack(packet, get(class))),
            unpack: Box::new(move |packet, class| {
                *get_mut(class) = unpack.unpack(packet)?;
                Ok(())
            }),
        });
        self
    }

    pub fn build(self) -> Pack<C> {
        let members = Arc::new(self.members);
        let unpack_members = Arc::clone(&members);
        Pack::new(
            move |packet, class| {
                for member in members.iter() {
                    (member.pack)(packet, class);
                }
            },
            move |packet| {
                let mut class = C::default();
                for member in unpack_members.iter() {
                    (member.unpack)(packet, &mut class)?;
                }
                Ok(class)
            },
        )
    }
}
