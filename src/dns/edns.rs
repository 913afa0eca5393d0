/// DNSSEC OK bit in the EDNS flags (RFC 3225)
const DO_BIT: u16 = 0x8000;

/// EDNS0 OPT pseudo-record (RFC 6891). Options are carried opaque.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdnsOpt {
    pub udp_payload_size: u16,
    pub extended_rcode: u8,
    pub version: u8,
    pub flags: u16,
    pub options: Vec<u8>,
}

impl Default for EdnsOpt {
    fn default() -> Self {
        Self::with_payload_size(crate::dnssec::constants::DNSSEC_UDP_SIZE)
    }
}

impl EdnsOpt {
    pub fn with_payload_size(udp_payload_size: u16) -> Self {
        Self {
            udp_payload_size,
            extended_rcode: 0,
            version: 0,
            flags: 0,
            options: Vec::new(),
        }
    }

    pub fn do_flag(&self) -> bool {
        self.flags & DO_BIT != 0
    }

    pub fn set_do_flag(&mut self, value: bool) {
        if value {
            self.flags |= DO_BIT;
        } else {
            self.flags &= !DO_BIT;
        }
    }

    /// The OPT record stores the payload size in CLASS and
    /// extended-rcode / version / flags in TTL.
    pub fn from_resource(class: u16, ttl: u32, rdata: &[u8]) -> Self {
        Self {
            udp_payload_size: class,
            extended_rcode: (ttl >> 24) as u8,
            version: (ttl >> 16) as u8,
            flags: ttl as u16,
            options: rdata.to_vec(),
        }
    }

    /// `(class, ttl, rdata)` for writing the OPT record
    pub fn to_resource(&self) -> (u16, u32, Vec<u8>) {
        let ttl = (u32::from(self.extended_rcode) << 24)
            | (u32::from(self.version) << 16)
            | u32::from(self.flags);
        (self.udp_payload_size, ttl, self.options.clone())
    }
}
