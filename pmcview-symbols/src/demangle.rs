use crate::intern::{intern, InternedString};

/// Attempt to demangle `name`. Returns `None` when the name is not in a
/// mangling scheme this tool meets (Rust, Itanium C++); such names pass
/// through unchanged.
pub fn demangle_any(name: &str) -> Option<String> {
    if let Ok(demangled) = rustc_demangle::try_demangle(name) {
        return Some(format!("{demangled:#}"));
    }

    if name.starts_with("_Z") {
        let options = cpp_demangle::DemangleOptions::default().no_return_type();
        if let Ok(symbol) = cpp_demangle::Symbol::new(name) {
            if let Ok(demangled) = symbol.demangle_with_options(&options) {
                return Some(demangled);
            }
        }
    }

    None
}

/// Demangle `name` into an interned string. When `include_templates` is
/// false, angle-bracketed template arguments are elided from the demangled
/// form; without this, template-heavy call chains are unreadable.
pub fn demangle(name: &InternedString, include_templates: bool) -> InternedString {
    match demangle_any(name) {
        Some(demangled) if !include_templates => intern(&strip_template_args(&demangled)),
        Some(demangled) => intern(&demangled),
        None => name.clone(),
    }
}

/// Remove every angle-bracket-enclosed subexpression, nesting aware.
fn strip_template_args(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut depth = 0usize;
    for c in name.chars() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{demangle, demangle_any, strip_template_args};
    use crate::intern::intern;

    #[test]
    fn cpp_demangling() {
        assert_eq!(
            demangle_any("_ZNK8KxVectorI16KxfArcFileRecordjEixEj").as_deref(),
            Some("KxVector<KxfArcFileRecord, unsigned int>::operator[](unsigned int) const")
        );
    }

    #[test]
    fn rust_demangling() {
        assert_eq!(
            demangle_any("_RNvMsr_NtCs3ssYzQotkvD_3std4pathNtB5_7PathBuf3newCs15kBYyAo9fc_7mycrate")
                .as_deref(),
            Some("<std::path::PathBuf>::new")
        );
    }

    #[test]
    fn plain_names_pass_through() {
        assert_eq!(demangle_any("main"), None);
        let name = intern("main");
        assert_eq!(demangle(&name, false), name);
    }

    #[test]
    fn template_args_stripped_by_default() {
        let name = intern("_ZNK8KxVectorI16KxfArcFileRecordjEixEj");
        assert_eq!(
            demangle(&name, false).as_str(),
            "KxVector::operator[](unsigned int) const"
        );
        assert_eq!(
            demangle(&name, true).as_str(),
            "KxVector<KxfArcFileRecord, unsigned int>::operator[](unsigned int) const"
        );
    }

    #[test]
    fn nested_template_args_stripped() {
        assert_eq!(
            strip_template_args("map<string, vector<int>>::find(int)"),
            "map::find(int)"
        );
    }
}
