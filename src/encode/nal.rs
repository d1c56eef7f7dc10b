//! H.264 NAL unit handling
//!
//! The encoder emits Annex B byte streams (start-code delimited). Movie
//! files store each access unit as 4-byte length-prefixed NAL units and
//! carry the parameter sets once, in the sample entry's `avcC` box.

/// NAL unit type constants
pub mod nal_type {
    pub const NON_IDR_SLICE: u8 = 1;
    pub const IDR_SLICE: u8 = 5;
    pub const SPS: u8 = 7;
    pub const PPS: u8 = 8;
}

/// Decoder configuration of an AVC stream (one SPS, one PPS)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcConfig {
    /// Sequence parameter set, without start code
    pub sps: Vec<u8>,
    /// Picture parameter set, without start code
    pub pps: Vec<u8>,
}

impl AvcConfig {
    pub fn profile_idc(&self) -> u8 {
        self.sps.get(1).copied().unwrap_or(66)
    }

    pub fn profile_compatibility(&self) -> u8 {
        self.sps.get(2).copied().unwrap_or(0)
    }

    pub fn level_idc(&self) -> u8 {
        self.sps.get(3).copied().unwrap_or(31)
    }

    /// Body of an `avcC` box (AVCDecoderConfigurationRecord)
    pub fn to_record(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(11 + self.sps.len() + self.pps.len());
        out.push(1);
        out.push(self.profile_idc());
        out.push(self.profile_compatibility());
        out.push(self.level_idc());
        // 4-byte NAL lengths
        out.push(0xFF);
        // one SPS
        out.push(0xE1);
        out.extend_from_slice(&(self.sps.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.sps);
        out.push(1);
        out.extend_from_slice(&(self.pps.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.pps);
        out
    }
}

/// Iterator over the NAL units of an Annex B stream
pub struct AnnexBNalIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> AnnexBNalIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let pos = find_start_code(data, 0).map(|(_, end)| end).unwrap_or(data.len());
        Self { data, pos }
    }
}

impl<'a> Iterator for AnnexBNalIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let start = self.pos;
        let (end, next) = match find_start_code(self.data, start) {
            Some((code_start, code_end)) => (code_start, code_end),
            None => (self.data.len(), self.data.len()),
        };
        self.pos = next;
        Some(&self.data[start..end])
    }
}

/// Find the next 3- or 4-byte start code at or after `from`.
///
/// Returns (start of the code, first byte after it).
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                let start = if i > from && data[i - 1] == 0 { i - 1 } else { i };
                return Some((start, i + 3));
            }
            if data[i + 2] == 0 && i + 4 <= data.len() && data[i + 3] == 1 {
                return Some((i, i + 4));
            }
        }
        i += 1;
    }
    None
}

fn nal_unit_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| b & 0x1F)
}

/// First SPS and PPS in an Annex B access unit
pub fn extract_avc_config(data: &[u8]) -> Option<AvcConfig> {
    let mut sps = None;
    let mut pps = None;
    for nal in AnnexBNalIter::new(data) {
        match nal_unit_type(nal) {
            Some(nal_type::SPS) if sps.is_none() => sps = Some(nal.to_vec()),
            Some(nal_type::PPS) if pps.is_none() => pps = Some(nal.to_vec()),
            _ => {}
        }
        if sps.is_some() && pps.is_some() {
            break;
        }
    }
    Some(AvcConfig {
        sps: sps?,
        pps: pps?,
    })
}

/// Convert an Annex B access unit to length-prefixed form.
///
/// Parameter sets are left out; they live in the `avcC` box.
pub fn annexb_to_avcc(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for nal in AnnexBNalIter::new(data) {
        match nal_unit_type(nal) {
            None | Some(nal_type::SPS) | Some(nal_type::PPS) => continue,
            Some(_) => {
                out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
                out.extend_from_slice(nal);
            }
        }
    }
    out
}

/// Whether the access unit contains an IDR slice
pub fn is_keyframe(data: &[u8]) -> bool {
    AnnexBNalIter::new(data).any(|nal| nal_unit_type(nal) == Some(nal_type::IDR_SLICE))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCESS_UNIT: [u8; 26] = [
        0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0xC0, 0x1F, // SPS
        0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x3C, 0x80, // PPS
        0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x00, 0x10, // IDR, 3-byte start code
        0xAA, 0xBB,
    ];

    #[test]
    fn test_iterates_mixed_start_codes() {
        let nals: Vec<&[u8]> = AnnexBNalIter::new(&ACCESS_UNIT).collect();
        assert_eq!(nals.len(), 3);
        assert_eq!(nals[0], &[0x67, 0x42, 0xC0, 0x1F]);
        assert_eq!(nals[1], &[0x68, 0xCE, 0x3C, 0x80]);
        assert_eq!(nals[2], &[0x65, 0x88, 0x84, 0x00, 0x10, 0xAA, 0xBB]);
    }

    #[test]
    fn test_extract_config_and_record() {
        let config = extract_avc_config(&ACCESS_UNIT).unwrap();
        assert_eq!(config.profile_idc(), 0x42);
        assert_eq!(config.level_idc(), 0x1F);

        let record = config.to_record();
        assert_eq!(&record[..6], &[1, 0x42, 0xC0, 0x1F, 0xFF, 0xE1]);
        assert_eq!(&record[6..8], &4u16.to_be_bytes());
        assert_eq!(record.len(), 6 + 2 + 4 + 1 + 2 + 4);
    }

    #[test]
    fn test_missing_pps_has_no_config() {
        assert!(extract_avc_config(&ACCESS_UNIT[..8]).is_none());
        assert!(extract_avc_config(&[]).is_none());
    }

    #[test]
    fn test_avcc_drops_parameter_sets() {
        let avcc = annexb_to_avcc(&ACCESS_UNIT);
        assert_eq!(&avcc[..4], &7u32.to_be_bytes());
        assert_eq!(avcc[4], 0x65);
        assert_eq!(avcc.len(), 4 + 7);
        assert!(is_keyframe(&ACCESS_UNIT));
        assert!(!is_keyframe(&ACCESS_UNIT[..16]));
    }
}
