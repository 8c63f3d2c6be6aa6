use std::net::{Ipv4Addr, Ipv6Addr};
use serde::{Deserialize, Serialize};
use crate::error::DecodeError;

pub const DNS_PORT: u16 = 53;

const HEADER_LEN: usize = 12;
const MAX_POINTER_JUMPS: usize = 16;
const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsAnswer {
    pub name: String,
    pub rtype: u16,
    pub ttl: u32,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsMessage {
    pub id: u16,
    pub is_response: bool,
    pub opcode: u8,
    pub rcode: u8,
    pub question_count: u16,
    pub answer_count: u16,
    pub authority_count: u16,
    pub additional_count: u16,
    pub questions: Vec<DnsQuestion>,
    /// Answers that decoded cleanly. Answer decoding stops quietly at the
    /// first malformed record.
    pub answers: Vec<DnsAnswer>,
}

impl DnsMessage {
    pub fn first_question(&self) -> Option<&str> {
        self.questions.first().map(|q| q.name.as_str())
    }
}

/// Parse a DNS message. The header and every question must decode.
pub fn parse(data: &[u8]) -> Result<DnsMessage, DecodeError> {
    if data.len() < HEADER_LEN {
        return Err(DecodeError::truncated("DNS", HEADER_LEN, data.len()));
    }

    let id = u16::from_be_bytes([data[0], data[1]]);
    let flags = u16::from_be_bytes([data[2], data[3]]);
    let question_count = u16::from_be_bytes([data[4], data[5]]);
    let answer_count = u16::from_be_bytes([data[6], data[7]]);
    let authority_count = u16::from_be_bytes([data[8], data[9]]);
    let additional_count = u16::from_be_bytes([data[10], data[11]]);

    let opcode = ((flags >> 11) & 0x0f) as u8;
    if opcode > 6 {
        return Err(DecodeError::invalid("DNS", format!("unknown opcode {}", opcode)));
    }

    let mut offset = HEADER_LEN;
    let mut questions = Vec::with_capacity(question_count.min(16) as usize);
    for _ in 0..question_count {
        let (name, next) = read_name(data, offset)?;
        if next + 4 > data.len() {
            return Err(DecodeError::truncated("DNS", next + 4, data.len()));
        }
        questions.push(DnsQuestion {
            name,
            qtype: u16::from_be_bytes([data[next], data[next + 1]]),
            qclass: u16::from_be_bytes([data[next + 2], data[next + 3]]),
        });
        offset = next + 4;
    }

    let mut answers = Vec::new();
    for _ in 0..answer_count {
        match read_answer(data, offset) {
            Ok((answer, next)) => {
                answers.push(answer);
                offset = next;
            }
            Err(_) => break,
        }
    }

    Ok(DnsMessage {
        id,
        is_response: flags & 0x8000 != 0,
        opcode,
        rcode: (flags & 0x000f) as u8,
        question_count,
        answer_count,
        authority_count,
        additional_count,
        questions,
        answers,
    })
}

fn read_answer(data: &[u8], offset: usize) -> Result<(DnsAnswer, usize), DecodeError> {
    let (name, next) = read_name(data, offset)?;
    if next + 10 > data.len() {
        return Err(DecodeError::truncated("DNS", next + 10, data.len()));
    }

    let rtype = u16::from_be_bytes([data[next], data[next + 1]]);
    let ttl = u32::from_be_bytes([data[next + 4], data[next + 5], data[next + 6], data[next + 7]]);
    let rdlength = u16::from_be_bytes([data[next + 8], data[next + 9]]) as usize;
    let rdata_start = next + 10;
    let rdata_end = rdata_start + rdlength;
    if rdata_end > data.len() {
        return Err(DecodeError::truncated("DNS", rdata_end, data.len()));
    }
    let rdata = &data[rdata_start..rdata_end];

    let rendered = match (rtype, rdata.len()) {
        (1, 4) => Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]).to_string(),
        (28, 16) => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(rdata);
            Ipv6Addr::from(octets).to_string()
        }
        (2 | 5 | 12, _) => read_name(data, rdata_start)?.0,
        _ => hex::encode(rdata),
    };

    Ok((
        DnsAnswer {
            name,
            rtype,
            ttl,
            data: rendered,
        },
        rdata_end,
    ))
}

/// Read a possibly compressed name starting at `offset`. Returns the dotted
/// name (no trailing dot, `<root>` for the root) and the offset just past
/// the name in the original position.
fn read_name(data: &[u8], offset: usize) -> Result<(String, usize), DecodeError> {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = offset;
    let mut resume_at = None;
    let mut jumps = 0;
    let mut total_len = 0;

    loop {
        let len = *data
            .get(pos)
            .ok_or_else(|| DecodeError::truncated("DNS", pos + 1, data.len()))? as usize;

        match len & 0xc0 {
            0x00 if len == 0 => {
                pos += 1;
                break;
            }
            0x00 => {
                let end = pos + 1 + len;
                if end > data.len() {
                    return Err(DecodeError::truncated("DNS", end, data.len()));
                }
                total_len += len + 1;
                if total_len > MAX_NAME_LEN {
                    return Err(DecodeError::invalid("DNS", "name exceeds 255 bytes"));
                }
                labels.push(String::from_utf8_lossy(&data[pos + 1..end]).into_owned());
                pos = end;
            }
            0xc0 => {
                let low = *data
                    .get(pos + 1)
                    .ok_or_else(|| DecodeError::truncated("DNS", pos + 2, data.len()))?;
                jumps += 1;
                if jumps > MAX_POINTER_JUMPS {
                    return Err(DecodeError::invalid("DNS", "compression pointer loop"));
                }
                if resume_at.is_none() {
                    resume_at = Some(pos + 2);
                }
                pos = ((len & 0x3f) << 8) | low as usize;
            }
            _ => {
                return Err(DecodeError::invalid("DNS", format!("bad label type 0x{:02x}", len)));
            }
        }
    }

    let name = if labels.is_empty() {
        "<root>".to_string()
    } else {
        labels.join(".")
    };

    Ok((name, resume_at.unwrap_or(pos)))
}

pub fn record_type_name(rtype: u16) -> String {
    match rtype {
        1 => "A".to_string(),
        2 => "NS".to_string(),
        5 => "CNAME".to_string(),
        6 => "SOA".to_string(),
        12 => "PTR".to_string(),
        15 => "MX".to_string(),
        16 => "TXT".to_string(),
        28 => "AAAA".to_string(),
        33 => "SRV".to_string(),
        65 => "HTTPS".to_string(),
        255 => "ANY".to_string(),
        other => format!("TYPE{}", other),
    }
}

#[cfg(test)]
pub(crate) fn build_query(id: u16, name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&0x0100u16.to_be_bytes()); // RD
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&[0u8; 6]);
    for label in name.split('.') {
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_response(id: u16, name: &str, addr: [u8; 4]) -> Vec<u8> {
        let mut out = build_query(id, name);
        out[2] = 0x81;
        out[3] = 0x80;
        out[7] = 1; // ancount
        out.extend_from_slice(&[0xc0, 0x0c]); // pointer to question name
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&300u32.to_be_bytes());
        out.extend_from_slice(&4u16.to_be_bytes());
        out.extend_from_slice(&addr);
        out
    }

    #[test]
    fn test_parse_query() {
        let message = parse(&build_query(0x1234, "example.com")).unwrap();

        assert_eq!(message.id, 0x1234);
        assert!(!message.is_response);
        assert_eq!(message.first_question(), Some("example.com"));
        assert_eq!(message.questions[0].qtype, 1);
        assert!(message.answers.is_empty());
    }

    #[test]
    fn test_parse_response_with_compressed_answer() {
        let message = parse(&build_response(7, "example.com", [93, 184, 216, 34])).unwrap();

        assert!(message.is_response);
        assert_eq!(message.answers.len(), 1);
        assert_eq!(message.answers[0].name, "example.com");
        assert_eq!(message.answers[0].data, "93.184.216.34");
        assert_eq!(message.answers[0].ttl, 300);
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(parse(&[0u8; 5]), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn test_truncated_question() {
        let mut query = build_query(1, "example.com");
        query.truncate(query.len() - 6);
        assert!(parse(&query).is_err());
    }

    #[test]
    fn test_pointer_loop_rejected() {
        let mut data = vec![0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0];
        data.extend_from_slice(&[0xc0, 0x0c]);
        data.extend_from_slice(&[0, 1, 0, 1]);
        assert!(matches!(parse(&data), Err(DecodeError::Invalid { .. })));
    }

    #[test]
    fn test_record_type_names() {
        assert_eq!(record_type_name(28), "AAAA");
        assert_eq!(record_type_name(999), "TYPE999");
    }
}
