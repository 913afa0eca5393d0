/// Key tag over DNSKEY RDATA (RFC 4034 Appendix B)
pub fn calculate_key_tag(rdata: &[u8]) -> u16 {
    // RSA/MD5 keys use the low 16 bits of the modulus instead
    if rdata.get(3) == Some(&1) {
        let len = rdata.len();
        if len >= 6 {
            return u16::from_be_bytes([rdata[len - 3], rdata[len - 2]]);
        }
        return 0;
    }

    let mut accumulator: u32 = 0;
    for (i, &byte) in rdata.iter().enumerate() {
        if i % 2 == 0 {
            accumulator += u32::from(byte) << 8;
        } else {
            accumulator += u32::from(byte);
        }
    }

    accumulator += (accumulator >> 16) & 0xFFFF;
    (accumulator & 0xFFFF) as u16
}
