//! DOS 8.3 filename handling: validation, comparison and wildcards.

use crate::error::{DosError, DosResult};

/// Maximum length of an 8.3 name with the dot: `XXXXXXXX.XXX`.
pub const DOS_NAME_LENGTH: usize = 12;

/// Uppercase a directory-entry name, rejecting names that cannot be
/// represented within the 8.3 limit.
pub fn validate_short_name(name: &str) -> DosResult<String> {
    if name.len() > DOS_NAME_LENGTH {
        return Err(DosError::NameTooLong(name.to_string()));
    }
    Ok(name.to_uppercase())
}

/// Case-insensitive name equality, the comparison DOS uses everywhere.
pub fn same_name(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn split_ext(s: &str) -> (&str, &str) {
    match s.rfind('.') {
        Some(pos) => (&s[..pos], &s[pos + 1..]),
        None => (s, ""),
    }
}

/// Match one space-padded 8.3 field against a wildcard field.
/// `?` matches any character including the pad, `*` matches the rest
/// of the field.
fn field_match(file: &str, wild: &str, width: usize) -> bool {
    let mut file_chars = file.chars().map(|c| c.to_ascii_uppercase());
    let mut wild_chars = wild.chars().map(|c| c.to_ascii_uppercase());

    for _ in 0..width {
        let w = wild_chars.next().unwrap_or(' ');
        let f = file_chars.next().unwrap_or(' ');
        match w {
            '*' => return true,
            '?' => continue,
            _ if w == f => continue,
            _ => return false,
        }
    }
    true
}

/// Compare a directory-entry name against a DOS wildcard pattern.
///
/// Both sides are split at the last dot into an 8-char name field and a
/// 3-char extension field, space padded, and matched field-wise.
pub fn wild_match(file: &str, pattern: &str) -> bool {
    let (fname, fext) = split_ext(file);
    let (wname, wext) = split_ext(pattern);
    field_match(fname, wname, 8) && field_match(fext, wext, 3)
}
