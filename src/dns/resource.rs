use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::{
    ParseError,
    common::{PacketComponent, name_labels},
    enums::{DNSResourceClass, DNSResourceType},
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSResource {
    pub labels: Vec<String>,
    pub rtype: DNSResourceType,
    pub rclass: DNSResourceClass,
    /// Raw class value, kept because OPT records abuse it as a payload size
    pub raw_class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

impl DNSResource {
    pub fn new(name: &str, rtype: DNSResourceType, ttl: u32, rdata: Vec<u8>) -> Self {
        Self {
            labels: name_labels(name).into_iter().map(str::to_string).collect(),
            rtype,
            rclass: DNSResourceClass::IN,
            raw_class: DNSResourceClass::IN.into(),
            ttl,
            rdata,
        }
    }

    /// Owner name in presentation form without the trailing dot, root is "."
    pub fn name(&self) -> String {
        let name = self
            .labels
            .iter()
            .filter(|l| !l.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(".");
        if name.is_empty() { ".".to_string() } else { name }
    }
}

impl PacketComponent for DNSResource {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        if self.rdata.len() > u16::MAX as usize {
            return Err(ParseError::InvalidAnswerSection);
        }
        self.write_labels(writer, &self.labels)?;
        writer.write_var::<u16>(16, self.rtype.into())?;
        writer.write_var::<u16>(16, self.raw_class)?;
        writer.write_var::<u32>(32, self.ttl)?;
        writer.write_var::<u16>(16, self.rdata.len() as u16)?;
        writer.write_bytes(&self.rdata)?;
        Ok(())
    }

    fn read_with_buffer<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet_buf: &[u8],
    ) -> Result<(), ParseError> {
        self.labels = self.read_labels_with_buffer(reader, packet_buf)?;
        self.rtype = reader.read_var::<u16>(16)?.into();
        self.raw_class = reader.read_var::<u16>(16)?;
        self.rclass = self.raw_class.into();
        self.ttl = reader.read_var::<u32>(32)?;
        let rdlength = reader.read_var::<u16>(16)?;
        let mut buf = vec![0_u8; rdlength as usize];
        reader.read_bytes(&mut buf)?;
        self.rdata = buf;

        Ok(())
    }
}
