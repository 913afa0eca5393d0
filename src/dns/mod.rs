pub mod client;
pub mod common;
pub mod edns;
pub mod enums;
pub mod header;
pub mod question;
pub mod resource;

use bitstream_io::{BigEndian, BitReader, BitWrite, BitWriter};
use common::PacketComponent;
use edns::EdnsOpt;
use enums::{DNSResourceType, ResponseCode};
use header::DNSHeader;
use question::DNSQuestion;
use resource::DNSResource;
use thiserror::Error;
use tracing::trace;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSPacket {
    pub header: DNSHeader,
    pub questions: Vec<DNSQuestion>,
    pub answers: Vec<DNSResource>,
    pub authorities: Vec<DNSResource>,
    pub resources: Vec<DNSResource>,
    /// EDNS0 OPT record if present (extracted from additional records)
    pub edns: Option<EdnsOpt>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid DNS header")]
    InvalidHeader,
    #[error("Invalid DNS label")]
    InvalidLabel,
    #[error("Invalid question section")]
    InvalidQuestionSection,
    #[error("Invalid answer section")]
    InvalidAnswerSection,
    #[error("Invalid bit stream: {0}")]
    InvalidBitStream(String),
}

impl From<std::io::Error> for ParseError {
    fn from(e: std::io::Error) -> Self {
        ParseError::InvalidBitStream(e.to_string())
    }
}

impl DNSPacket {
    /// Build a recursive query, optionally asking for DNSSEC records.
    pub fn query(id: u16, name: &str, qtype: DNSResourceType, dnssec_ok: bool) -> Self {
        let mut edns = EdnsOpt::with_payload_size(crate::dnssec::constants::DNSSEC_UDP_SIZE);
        edns.set_do_flag(dnssec_ok);

        DNSPacket {
            header: DNSHeader {
                id,
                rd: true,
                // Ask for raw data; the validation happens locally
                cd: dnssec_ok,
                qdcount: 1,
                ..Default::default()
            },
            questions: vec![DNSQuestion::new(name, qtype)],
            edns: Some(edns),
            ..Default::default()
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        trace!("Parsing DNS packet, size: {} bytes", buf.len());
        if buf.len() < 12 {
            return Err(ParseError::InvalidHeader);
        }
        let mut reader = BitReader::<_, BigEndian>::new(buf);
        let mut packet = DNSPacket::default();
        packet.header.read_with_buffer(&mut reader, buf)?;

        for _ in 0..packet.header.qdcount {
            let mut question = DNSQuestion::default();
            question.read_with_buffer(&mut reader, buf)?;
            packet.questions.push(question);
        }

        for _ in 0..packet.header.ancount {
            let mut answer = DNSResource::default();
            answer.read_with_buffer(&mut reader, buf)?;
            packet.answers.push(answer);
        }

        for _ in 0..packet.header.nscount {
            let mut authority = DNSResource::default();
            authority.read_with_buffer(&mut reader, buf)?;
            packet.authorities.push(authority);
        }

        for _ in 0..packet.header.arcount {
            let mut resource = DNSResource::default();
            resource.read_with_buffer(&mut reader, buf)?;

            if resource.rtype == DNSResourceType::OPT && resource.labels.is_empty() {
                packet.edns = Some(EdnsOpt::from_resource(
                    resource.raw_class,
                    resource.ttl,
                    &resource.rdata,
                ));
                continue;
            }

            packet.resources.push(resource);
        }

        Ok(packet)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ParseError> {
        let mut buf = Vec::new();
        let mut writer: BitWriter<&mut Vec<u8>, BigEndian> = BitWriter::new(&mut buf);

        let mut header = self.header.clone();
        header.qdcount = self.questions.len() as u16;
        header.ancount = self.answers.len() as u16;
        header.nscount = self.authorities.len() as u16;
        header.arcount = self.resources.len() as u16 + u16::from(self.edns.is_some());

        header.write(&mut writer)?;

        for question in &self.questions {
            question.write(&mut writer)?;
        }
        for record in self
            .answers
            .iter()
            .chain(&self.authorities)
            .chain(&self.resources)
        {
            record.write(&mut writer)?;
        }

        if let Some(edns) = &self.edns {
            let (class, ttl, rdata) = edns.to_resource();
            // Root owner name, TYPE OPT
            writer.write_var::<u8>(8, 0)?;
            writer.write_var::<u16>(16, DNSResourceType::OPT.into())?;
            writer.write_var::<u16>(16, class)?;
            writer.write_var::<u32>(32, ttl)?;
            writer.write_var::<u16>(16, rdata.len() as u16)?;
            writer.write_bytes(&rdata)?;
        }

        Ok(buf)
    }

    /// Response code including the EDNS extended bits
    pub fn rcode(&self) -> ResponseCode {
        let extended = self.edns.as_ref().map_or(0, |e| e.extended_rcode);
        if extended != 0 {
            return ResponseCode::Other((extended << 4) | self.header.rcode);
        }
        ResponseCode::from_u8(self.header.rcode)
    }
}
