use crate::error::DriveError;

/// Parses a human-readable size like "400M" or "10G" into bytes.
///
/// Suffixes use binary prefixes: K/M/G/T multiply by powers of 1024.
/// "KB"/"KiB" style spellings are accepted, as is a bare "B" or no
/// suffix at all for plain bytes.
pub fn parse_size(input: &str) -> Result<u64, DriveError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DriveError::InvalidSize("empty size string".to_string()));
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| DriveError::InvalidSize(input.to_string()))?;

    let multiplier: u64 = match suffix.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1 << 10,
        "M" | "MB" | "MIB" => 1 << 20,
        "G" | "GB" | "GIB" => 1 << 30,
        "T" | "TB" | "TIB" => 1 << 40,
        _ => return Err(DriveError::InvalidSize(input.to_string())),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| DriveError::InvalidSize(input.to_string()))
}
