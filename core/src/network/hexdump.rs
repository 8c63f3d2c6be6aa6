use std::fmt::Write;

const BYTES_PER_LINE: usize = 16;
const HEX_COLUMN_WIDTH: usize = 48;

/// Wireshark-style dump: offset, hex column padded to a fixed width, then
/// the printable ASCII view.
pub fn render(bytes: &[u8]) -> String {
    let mut lines = Vec::with_capacity(bytes.len().div_ceil(BYTES_PER_LINE));

    for (index, chunk) in bytes.chunks(BYTES_PER_LINE).enumerate() {
        let mut hex_part = String::with_capacity(HEX_COLUMN_WIDTH);
        for (i, byte) in chunk.iter().enumerate() {
            if i > 0 {
                hex_part.push(' ');
            }
            let _ = write!(hex_part, "{:02x}", byte);
        }

        let ascii_part: String = chunk
            .iter()
            .map(|&b| if (0x20..=0x7e).contains(&b) { b as char } else { '.' })
            .collect();

        lines.push(format!(
            "{:04x}  {:<width$}  {}",
            index * BYTES_PER_LINE,
            hex_part,
            ascii_part,
            width = HEX_COLUMN_WIDTH
        ));
    }

    lines.join("\n")
}
