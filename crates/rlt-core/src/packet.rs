// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RELAYMESH (RLT) - PACKET HEADER CODEC
//
// Bit-exact wire headers carried ahead of every mesh message body.
// v2 (38 B): version, ttl, fee_per_hop, tx_hash.
// v3 (79 B): v2 fields plus pow_difficulty, pow_nonce, pow_hash.
// The transport layer owns framing; the core only encodes/decodes and
// decrements TTL at each hop.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const HEADER_VERSION_V2: u8 = 0x02;
pub const HEADER_VERSION_V3: u8 = 0x03;

/// v2 header: version (1) + ttl (1) + fee_per_hop (4 LE) + tx_hash (32)
pub const HEADER_V2_LEN: usize = 38;

/// v3 header: v2 fields + pow_difficulty (1) + pow_nonce (8 LE) + pow_hash (32)
pub const HEADER_V3_LEN: usize = 79;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Version byte is neither 0x02 nor 0x03.
    BadVersion(u8),
    /// Buffer shorter than the header demands.
    TooShort { need: usize, got: usize },
    /// TTL already zero; the packet must not be forwarded again.
    TtlExpired,
}

impl std::fmt::Display for PacketError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PacketError::BadVersion(v) => write!(f, "Unsupported header version 0x{:02x}", v),
            PacketError::TooShort { need, got } => {
                write!(f, "Packet too short: need {} bytes, got {}", need, got)
            }
            PacketError::TtlExpired => write!(f, "TTL expired"),
        }
    }
}

impl std::error::Error for PacketError {}

/// Packet header v2: the pre-PoW wire format, still accepted on receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeaderV2 {
    pub ttl: u8,
    pub fee_per_hop: u32,
    pub tx_hash: [u8; 32],
}

impl PacketHeaderV2 {
    pub fn new(ttl: u8, fee_per_hop: u32, tx_hash: [u8; 32]) -> Self {
        Self {
            ttl,
            fee_per_hop,
            tx_hash,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_V2_LEN] {
        let mut out = [0u8; HEADER_V2_LEN];
        out[0] = HEADER_VERSION_V2;
        out[1] = self.ttl;
        out[2..6].copy_from_slice(&self.fee_per_hop.to_le_bytes());
        out[6..38].copy_from_slice(&self.tx_hash);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.is_empty() {
            return Err(PacketError::TooShort {
                need: HEADER_V2_LEN,
                got: 0,
            });
        }
        if bytes[0] != HEADER_VERSION_V2 {
            return Err(PacketError::BadVersion(bytes[0]));
        }
        if bytes.len() < HEADER_V2_LEN {
            return Err(PacketError::TooShort {
                need: HEADER_V2_LEN,
                got: bytes.len(),
            });
        }
        let mut tx_hash = [0u8; 32];
        tx_hash.copy_from_slice(&bytes[6..38]);
        Ok(Self {
            ttl: bytes[1],
            fee_per_hop: u32::from_le_bytes(bytes[2..6].try_into().unwrap_or([0u8; 4])),
            tx_hash,
        })
    }

    /// Promote to v3 with zeroed PoW fields (difficulty 0 = no PoW required).
    pub fn upgrade(&self) -> PacketHeaderV3 {
        PacketHeaderV3 {
            ttl: self.ttl,
            fee_per_hop: self.fee_per_hop,
            tx_hash: self.tx_hash,
            pow_difficulty: 0,
            pow_nonce: 0,
            pow_hash: [0u8; 32],
        }
    }
}

/// Packet header v3 carries the anti-spam PoW fields. `pow_difficulty == 0`
/// means the declared fee met the relay minimum and no PoW was attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeaderV3 {
    pub ttl: u8,
    pub fee_per_hop: u32,
    pub tx_hash: [u8; 32],
    pub pow_difficulty: u8,
    pub pow_nonce: u64,
    pub pow_hash: [u8; 32],
}

impl PacketHeaderV3 {
    pub fn encode(&self) -> [u8; HEADER_V3_LEN] {
        let mut out = [0u8; HEADER_V3_LEN];
        out[0] = HEADER_VERSION_V3;
        out[1] = self.ttl;
        out[2..6].copy_from_slice(&self.fee_per_hop.to_le_bytes());
        out[6..38].copy_from_slice(&self.tx_hash);
        out[38] = self.pow_difficulty;
        out[39..47].copy_from_slice(&self.pow_nonce.to_le_bytes());
        out[47..79].copy_from_slice(&self.pow_hash);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.is_empty() {
            return Err(PacketError::TooShort {
                need: HEADER_V3_LEN,
                got: 0,
            });
        }
        // A v2 header maps to v3 with zeroed PoW fields
        if bytes[0] == HEADER_VERSION_V2 {
            return PacketHeaderV2::decode(bytes).map(|h| h.upgrade());
        }
        if bytes[0] != HEADER_VERSION_V3 {
            return Err(PacketError::BadVersion(bytes[0]));
        }
        if bytes.len() < HEADER_V3_LEN {
            return Err(PacketError::TooShort {
                need: HEADER_V3_LEN,
                got: bytes.len(),
            });
        }
        let mut tx_hash = [0u8; 32];
        tx_hash.copy_from_slice(&bytes[6..38]);
        let mut pow_hash = [0u8; 32];
        pow_hash.copy_from_slice(&bytes[47..79]);
        Ok(Self {
            ttl: bytes[1],
            fee_per_hop: u32::from_le_bytes(bytes[2..6].try_into().unwrap_or([0u8; 4])),
            tx_hash,
            pow_difficulty: bytes[38],
            pow_nonce: u64::from_le_bytes(bytes[39..47].try_into().unwrap_or([0u8; 8])),
            pow_hash,
        })
    }

    pub fn has_pow(&self) -> bool {
        self.pow_difficulty > 0
    }
}

/// Decrement the TTL of a full packet buffer (header + body) for the next
/// hop. Returns a fresh buffer; the input is untouched so the caller can
/// still NACK with the original bytes.
pub fn decrement_ttl(packet: &[u8]) -> Result<Vec<u8>, PacketError> {
    if packet.is_empty() {
        return Err(PacketError::TooShort { need: 2, got: 0 });
    }
    let header_len = match packet[0] {
        HEADER_VERSION_V2 => HEADER_V2_LEN,
        HEADER_VERSION_V3 => HEADER_V3_LEN,
        v => return Err(PacketError::BadVersion(v)),
    };
    if packet.len() < header_len {
        return Err(PacketError::TooShort {
            need: header_len,
            got: packet.len(),
        });
    }
    if packet[1] == 0 {
        return Err(PacketError::TtlExpired);
    }
    let mut out = packet.to_vec();
    out[1] -= 1;
    Ok(out)
}

// ─────────────────────────────────────────────────────────────────
// TESTS
// ─────────────────────────────────────────────────────────────────
