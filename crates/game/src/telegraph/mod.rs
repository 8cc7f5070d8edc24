mod pack;
mod packet;
#[allow(clippy::module_inception)]
mod telegraph;

pub use pack::{
    ClassPack, Pack, PackEnum, PackError, bool_pack, byte_pack, enum_pack, list_pack, map_pack,
    optional_pack, pair_pack, string_pack, vec2_pack,
};
pub use packet::{ByteValue, Packet, PacketError};
pub use telegraph::{Reception, Telegraph, TelegraphError};
