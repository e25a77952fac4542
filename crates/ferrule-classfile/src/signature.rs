//! Foreign signature string utilities
//!
//! Signatures use the foreign descriptor grammar: single-letter primitive
//! codes (`Z B C S I J F D V`), reference types as `Lfoo/bar/Baz;`, array
//! rank as leading `[` markers. Class names inside signatures are always
//! slash-separated; a dotted name is a caller bug.

use thiserror::Error;

/// Signature parsing errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigError {
    /// Signature string does not follow the descriptor grammar
    #[error("malformed signature: {0}")]
    Malformed(String),
}

/// One element of a parsed signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigElem {
    /// `Z`
    Boolean,
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `S`
    Short,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `F`
    Float,
    /// `D`
    Double,
    /// `V` (return position only)
    Void,
    /// `Lfoo/bar/Baz;` — carries the slash-separated class name
    Class(String),
    /// `[`-prefixed element — carries the full array name (e.g. `[[I`,
    /// `[Ljava/lang/String;`), which is itself a loadable class name
    Array(String),
}

impl SigElem {
    /// The loadable foreign class name for this element, if it has one.
    ///
    /// Primitives have none; classes yield their slash-separated name and
    /// arrays their bracketed form.
    pub fn class_name(&self) -> Option<&str> {
        match self {
            SigElem::Class(name) | SigElem::Array(name) => Some(name),
            _ => None,
        }
    }

    /// Innermost class name of an array element, if any.
    pub fn innermost_class_name(&self) -> Option<&str> {
        match self {
            SigElem::Class(name) => Some(name),
            SigElem::Array(name) => {
                let stripped = name.trim_start_matches('[');
                stripped
                    .strip_prefix('L')
                    .and_then(|s| s.strip_suffix(';'))
            }
            _ => None,
        }
    }
}

fn parse_elem(sig: &str, pos: &mut usize, allow_void: bool) -> Result<SigElem, SigError> {
    let bytes = sig.as_bytes();
    let start = *pos;
    match bytes.get(*pos) {
        Some(b'Z') => {
            *pos += 1;
            Ok(SigElem::Boolean)
        }
        Some(b'B') => {
            *pos += 1;
            Ok(SigElem::Byte)
        }
        Some(b'C') => {
            *pos += 1;
            Ok(SigElem::Char)
        }
        Some(b'S') => {
            *pos += 1;
            Ok(SigElem::Short)
        }
        Some(b'I') => {
            *pos += 1;
            Ok(SigElem::Int)
        }
        Some(b'J') => {
            *pos += 1;
            Ok(SigElem::Long)
        }
        Some(b'F') => {
            *pos += 1;
            Ok(SigElem::Float)
        }
        Some(b'D') => {
            *pos += 1;
            Ok(SigElem::Double)
        }
        Some(b'V') if allow_void => {
            *pos += 1;
            Ok(SigElem::Void)
        }
        Some(b'L') => {
            let end = sig[*pos..]
                .find(';')
                .ok_or_else(|| SigError::Malformed(sig.to_string()))?;
            let name = &sig[*pos + 1..*pos + end];
            debug_assert!(!name.contains('.'), "dotted name in signature: {name}");
            *pos += end + 1;
            Ok(SigElem::Class(name.to_string()))
        }
        Some(b'[') => {
            while bytes.get(*pos) == Some(&b'[') {
                *pos += 1;
            }
            // consume the element descriptor after the rank markers
            parse_elem(sig, pos, false)?;
            Ok(SigElem::Array(sig[start..*pos].to_string()))
        }
        _ => Err(SigError::Malformed(sig.to_string())),
    }
}

/// Split a method signature into its argument elements and return element.
pub fn split_method_sig(sig: &str) -> Result<(Vec<SigElem>, SigElem), SigError> {
    debug_assert!(!sig.contains('.'), "dotted name in signature: {sig}");
    if !sig.starts_with('(') {
        return Err(SigError::Malformed(sig.to_string()));
    }
    let mut pos = 1;
    let mut args = Vec::new();
    loop {
        if sig.as_bytes().get(pos) == Some(&b')') {
            pos += 1;
            break;
        }
        args.push(parse_elem(sig, &mut pos, false)?);
    }
    let ret = parse_elem(sig, &mut pos, true)?;
    if pos != sig.len() {
        return Err(SigError::Malformed(sig.to_string()));
    }
    Ok((args, ret))
}

/// The return portion of a method signature (everything after `)`).
pub fn ret_sig_of(sig: &str) -> &str {
    match sig.find(')') {
        Some(idx) => &sig[idx + 1..],
        None => sig,
    }
}

/// Is this a well-formed single field/type signature?
pub fn field_sig_is_valid(sig: &str) -> bool {
    let mut pos = 0;
    matches!(parse_elem(sig, &mut pos, false), Ok(_)) && pos == sig.len()
}

/// The package portion of a slash-separated class name (empty for the
/// default package).
pub fn package_of(name: &str) -> &str {
    match name.rfind('/') {
        Some(idx) => &name[..idx],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_primitives() {
        let (args, ret) = split_method_sig("(IJZ)V").unwrap();
        assert_eq!(args, vec![SigElem::Int, SigElem::Long, SigElem::Boolean]);
        assert_eq!(ret, SigElem::Void);
    }

    #[test]
    fn test_split_references_and_arrays() {
        let (args, ret) = split_method_sig("(Ljava/lang/String;[[I)Ljava/lang/Object;").unwrap();
        assert_eq!(
            args,
            vec![
                SigElem::Class("java/lang/String".to_string()),
                SigElem::Array("[[I".to_string()),
            ]
        );
        assert_eq!(ret, SigElem::Class("java/lang/Object".to_string()));
    }

    #[test]
    fn test_void_only_in_return_position() {
        assert!(split_method_sig("(V)V").is_err());
    }

    #[test]
    fn test_malformed() {
        assert!(split_method_sig("()").is_err());
        assert!(split_method_sig("(Lmissing)V").is_err());
        assert!(split_method_sig("(I)Vx").is_err());
    }

    #[test]
    fn test_field_sig() {
        assert!(field_sig_is_valid("I"));
        assert!(field_sig_is_valid("[Ljava/lang/String;"));
        assert!(!field_sig_is_valid("V"));
        assert!(!field_sig_is_valid("IJ"));
    }

    #[test]
    fn test_package_of() {
        assert_eq!(package_of("java/lang/Object"), "java/lang");
        assert_eq!(package_of("TopLevel"), "");
    }

    #[test]
    fn test_ret_sig_of() {
        assert_eq!(ret_sig_of("(II)J"), "J");
        assert_eq!(ret_sig_of("()Ljava/lang/String;"), "Ljava/lang/String;");
    }

    #[test]
    fn test_innermost_class_name() {
        let (args, _) = split_method_sig("([[Lfoo/Bar;)V").unwrap();
        assert_eq!(args[0].innermost_class_name(), Some("foo/Bar"));
    }
}
