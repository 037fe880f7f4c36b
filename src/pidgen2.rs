//! PIDGEN2 decimal key scheme
//!
//! Pure decimal arithmetic, no cryptography. Three key shapes exist and
//! are told apart solely by how many digits survive filtering:
//!
//! | shape  | digits | layout                          |
//! |--------|--------|---------------------------------|
//! | FPP    | 10     | `CCC-NNNNNNK`                   |
//! | Office | 11     | `CCCE-NNNNNNK`                  |
//! | OEM    | 17     | `DDDYY-OEM-ZZOOONK-NNNNN`       |
//!
//! `K` is the mod-7 check digit `7 - (digit sum mod 7)`, `E` is the
//! Office channel check digit (`channel mod 10 + 1`), and the OEM shape
//! front-loads day-of-year and a two-digit year. Channel IDs from the
//! repeated-digit denylist (333 through 999) are never valid.

use tracing::debug;

/// Caller-supplied inputs for PIDGEN2 generation.
#[derive(Clone, Copy, Debug, Default)]
pub struct Pidgen2Info {
    /// Emit the 17-digit OEM shape.
    pub is_oem: bool,
    /// Emit the 11-digit Office shape.
    pub is_office: bool,
    /// Day of year (OEM only), reduced mod 366.
    pub day: u32,
    /// Two-digit year (OEM only).
    pub year: u32,
    /// Sales channel, reduced mod 1000.
    pub channel_id: u32,
    /// Serial, reduced mod 1_000_000.
    pub serial: u32,
}

const FPP_LEN: usize = 10;
const OFFICE_LEN: usize = 11;
const OEM_LEN: usize = 17;

const CHANNEL_DENYLIST: [u32; 7] = [333, 444, 555, 666, 777, 888, 999];
const VALID_YEARS: [u32; 8] = [95, 96, 97, 98, 99, 0, 1, 2];

/// Mod-7 check digit for `x`: `7 - (digit sum mod 7)`, in `1..=7`.
pub fn check_digit(x: u64) -> u64 {
    let mut sum = 0;
    let mut v = x;
    while v != 0 {
        sum += v % 10;
        v /= 10;
    }
    7 - sum % 7
}

/// Whether the trailing digit of `x` is its mod-7 check digit.
pub fn is_valid_mod7(x: u64) -> bool {
    check_digit(x / 10) == x % 10
}

/// Generate a key in its bare all-digit form.
pub fn generate(info: &Pidgen2Info) -> String {
    let channel = info.channel_id % 1_000;
    let serial = info.serial % 1_000_000;

    let key = if info.is_oem {
        let day = info.day % 366;
        // The serial's leading digit moves into the OEM ID before the
        // check digit is appended.
        let mut oemid = (channel as u64) * 10 + (serial / 100_000) as u64;
        let serial = serial % 100_000;
        oemid = oemid * 10 + check_digit(oemid);
        format!("{:03}{:02}{:07}{:05}", day, info.year % 100, oemid, serial)
    } else if info.is_office {
        let channel = channel * 10 + (channel % 10 + 1);
        let serial = (serial as u64) * 10 + check_digit(serial as u64);
        format!("{:04}{:07}", channel, serial)
    } else {
        let serial = (serial as u64) * 10 + check_digit(serial as u64);
        format!("{:03}{:07}", channel, serial)
    };
    debug!(%key, "generated pidgen2 key");
    key
}

/// Filter a user-supplied key down to its digits.
///
/// Returns `None` when the digit count matches no known shape.
pub fn strip_key(input: &str) -> Option<String> {
    let digits: String = input.chars().filter(|c| c.is_ascii_digit()).collect();
    matches!(digits.len(), FPP_LEN | OFFICE_LEN | OEM_LEN).then_some(digits)
}

/// Validate a bare all-digit key; the shape is inferred from its length.
pub fn validate(key: &str) -> bool {
    let field = |range: std::ops::Range<usize>| -> Option<u64> {
        key.get(range).and_then(|s| s.parse().ok())
    };
    match key.len() {
        FPP_LEN => {
            let (Some(channel), Some(serial)) = (field(0..3), field(3..10)) else {
                return false;
            };
            channel_allowed(channel as u32) && is_valid_mod7(serial)
        }
        OFFICE_LEN => {
            let (Some(channel), Some(serial)) = (field(0..4), field(4..11)) else {
                return false;
            };
            office_channel_valid(channel as u32) && is_valid_mod7(serial)
        }
        OEM_LEN => {
            let (Some(day), Some(year), Some(oemid), Some(_serial)) =
                (field(0..3), field(3..5), field(5..12), field(12..17))
            else {
                return false;
            };
            // Day 0 is accepted here because the historical generator
            // emitted it; see the OEM notes in DESIGN.md.
            day <= 366
                && VALID_YEARS.contains(&(year as u32))
                && oemid != 0
                && is_valid_mod7(oemid)
        }
        _ => false,
    }
}

fn channel_allowed(channel: u32) -> bool {
    !CHANNEL_DENYLIST.contains(&channel)
}

/// Office channels carry a trailing check digit equal to the base
/// channel's last digit plus one.
fn office_channel_valid(channel: u32) -> bool {
    let check = channel % 10;
    let base = channel / 10;
    channel_allowed(base) && (base % 10) + 1 == check
}

/// Render a bare key in its dashed display form.
pub fn format_key(key: &str) -> String {
    match key.len() {
        FPP_LEN => format!("{}-{}", &key[0..3], &key[3..10]),
        OFFICE_LEN => format!("{}-{}", &key[0..4], &key[4..11]),
        OEM_LEN => format!("{}-OEM-{}-{}", &key[0..5], &key[5..12], &key[12..17]),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_info() -> Pidgen2Info {
        Pidgen2Info {
            is_oem: false,
            is_office: false,
            day: 60,
            year: 99,
            channel_id: 95,
            serial: 111_111,
        }
    }

    #[test]
    fn generates_fpp_key() {
        let key = generate(&base_info());
        assert_eq!(format_key(&key), "095-1111111");
        assert!(validate(&key));
    }

    #[test]
    fn generates_office_key() {
        let mut info = base_info();
        info.is_office = true;
        let key = generate(&info);
        assert_eq!(format_key(&key), "0956-1111111");
        assert!(validate(&key));
    }

    #[test]
    fn generates_oem_key() {
        let mut info = base_info();
        info.is_oem = true;
        let key = generate(&info);
        assert_eq!(format_key(&key), "06099-OEM-0009516-11111");
        assert!(validate(&key));
    }

    #[test]
    fn stringify_shapes() {
        assert_eq!(format_key("0951111111"), "095-1111111");
        assert_eq!(format_key("09561111111"), "0956-1111111");
        assert_eq!(format_key("06099000951611111"), "06099-OEM-0009516-11111");
    }

    #[test]
    fn strip_key_accepts_dashed_input() {
        assert_eq!(strip_key("095-1111111").as_deref(), Some("0951111111"));
        assert_eq!(
            strip_key("06099-OEM-0009516-11111").as_deref(),
            Some("06099000951611111")
        );
        assert!(strip_key("095-111").is_none());
    }

    #[test]
    fn denylist_channels_rejected() {
        for channel in [333, 444, 555, 666, 777, 888, 999] {
            let info = Pidgen2Info { channel_id: channel, serial: 111_111, ..base_info() };
            assert!(!validate(&generate(&info)), "channel {channel}");
        }
    }

    #[test]
    fn office_channel_check_digit_enforced() {
        // 0956 carries the correct +1 digit; 0957 does not.
        assert!(validate("09561111111"));
        assert!(!validate("09571111111"));
    }

    #[test]
    fn oem_year_and_day_bounds() {
        // Year 03 was never issued.
        assert!(!validate("06003000951611111"));
        // Day 367 is out of range, day 0 is accepted.
        assert!(!validate("36799000951611111"));
        assert!(validate("00099000951611111"));
    }

    #[test]
    fn mod7_check_digit_equivalence() {
        for x in [0u64, 1, 95, 951, 111_111, 999_999, 123_456] {
            let with_check = x * 10 + check_digit(x);
            assert!(is_valid_mod7(with_check), "x = {x}");
            // Any other trailing digit must fail.
            for d in 0..10 {
                if d != check_digit(x) {
                    assert!(!is_valid_mod7(x * 10 + d), "x = {x}, d = {d}");
                }
            }
        }
    }
}
