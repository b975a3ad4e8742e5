use regex::RegexBuilder;

/// Width used when no numbered sibling exists yet (`image0001.png`).
const DEFAULT_SUFFIX_WIDTH: usize = 4;

/// Returns `candidate` if no existing name matches it case-insensitively,
/// otherwise a numbered variant one past the largest number in use.
///
/// For `Section0001.xhtml` the prefix is `Section` and the extension
/// `xhtml`; every existing `Section<digits>.xhtml` is scanned and the next
/// number is zero-padded to the width of the largest one found.
///
/// The result is only collision-free if `existing` contains every name that
/// is already committed, so callers must hold the registry's reservation lock
/// from this call until the new name is registered.
pub fn make_unique<'a, I>(candidate: &str, existing: I) -> String
where
    I: IntoIterator<Item = &'a str>,
    I::IntoIter: Clone,
{
    let existing = existing.into_iter();
    let folded = candidate.to_lowercase();
    if !existing.clone().any(|name| name.to_lowercase() == folded) {
        return candidate.to_string();
    }

    let (base, extension) = match candidate.find('.') {
        Some(pos) => (&candidate[..pos], Some(&candidate[pos + 1..])),
        None => (candidate, None),
    };
    let prefix = base.trim_end_matches(|c: char| c.is_ascii_digit());

    let pattern = match extension {
        Some(ext) => format!(r"^{}(\d*)\.{}$", regex::escape(prefix), regex::escape(ext)),
        None => format!(r"^{}(\d*)$", regex::escape(prefix)),
    };
    let Ok(matcher) = RegexBuilder::new(&pattern).case_insensitive(true).build() else {
        // Escaped input always compiles; fall back to a plain suffix anyway
        return format!("{candidate}-{}", uuid::Uuid::new_v4().simple());
    };

    let mut largest: Option<(u64, usize)> = None;
    for name in existing {
        let Some(digits) = matcher.captures(name).and_then(|c| c.get(1)) else {
            continue;
        };
        let Ok(number) = digits.as_str().parse::<u64>() else {
            continue;
        };
        if largest.is_none_or(|(max, _)| number > max) {
            largest = Some((number, digits.len()));
        }
    }

    let (max, width) = largest.unwrap_or((0, DEFAULT_SUFFIX_WIDTH));
    let next = max.saturating_add(1);
    match extension {
        Some(ext) => format!("{prefix}{next:0width$}.{ext}"),
        None => format!("{prefix}{next:0width$}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn unique(candidate: &str, existing: &[&str]) -> String {
        make_unique(candidate, existing.iter().copied())
    }

    #[test]
    fn test_no_collision_returns_candidate() {
        assert_eq!(unique("cover.png", &["Section0001.xhtml"]), "cover.png");
        assert_eq!(unique("cover.png", &[]), "cover.png");
    }

    #[test]
    fn test_increments_existing_number() {
        assert_eq!(unique("Section0001.xhtml", &["Section0001.xhtml"]), "Section0002.xhtml");
        assert_eq!(
            unique("image.png", &["image.png", "image0001.png"]),
            "image0002.png"
        );
    }

    #[test]
    fn test_collision_is_case_insensitive() {
        assert_eq!(unique("COVER.PNG", &["cover.png"]), "COVER0001.PNG");
        assert_eq!(
            unique("Section0001.xhtml", &["section0001.XHTML", "SECTION0007.xhtml"]),
            "Section0008.xhtml"
        );
    }

    #[test]
    fn test_collision_folds_non_ascii_case() {
        assert_eq!(unique("Ärger.xhtml", &["ärger.xhtml"]), "Ärger0001.xhtml");
        assert_eq!(unique("ÉTÉ.css", &["été.css", "été0003.css"]), "ÉTÉ0004.css");
        assert_eq!(unique("Ärger.xhtml", &["arger.xhtml"]), "Ärger.xhtml");
    }

    #[test]
    fn test_keeps_observed_width() {
        assert_eq!(unique("ch1.xhtml", &["ch1.xhtml", "ch12.xhtml"]), "ch13.xhtml");
        assert_eq!(unique("ch9.xhtml", &["ch9.xhtml"]), "ch10.xhtml");
        assert_eq!(unique("ch09.xhtml", &["ch09.xhtml"]), "ch10.xhtml");
    }

    #[test]
    fn test_complete_suffix_and_no_extension() {
        assert_eq!(unique("book.tar.gz", &["book.tar.gz"]), "book0001.tar.gz");
        assert_eq!(unique("README", &["readme"]), "README0001");
    }

    #[test]
    fn test_other_extensions_are_ignored() {
        assert_eq!(
            unique("img.png", &["img.png", "img0005.jpg"]),
            "img0001.png"
        );
    }

    proptest! {
        #[test]
        fn prop_absent_name_is_unchanged(
            name in "[a-z]{1,8}\\.[a-z]{2,4}",
            others in proptest::collection::vec("[A-Z]{1,8}[0-9]{0,3}\\.xyz", 0..8),
        ) {
            let existing: Vec<&str> = others.iter().map(String::as_str).collect();
            prop_assume!(!existing.iter().any(|e| e.to_lowercase() == name.to_lowercase()));
            prop_assert_eq!(make_unique(&name, existing.iter().copied()), name);
        }

        #[test]
        fn prop_result_is_never_taken(
            stem in "[a-z]{1,6}",
            numbers in proptest::collection::vec(0u32..500, 1..10),
        ) {
            let mut existing: Vec<String> = numbers.iter().map(|n| format!("{stem}{n:04}.xhtml")).collect();
            existing.push(format!("{stem}.xhtml"));
            let candidate = existing[0].clone();

            let result = make_unique(&candidate, existing.iter().map(String::as_str));
            prop_assert!(!existing.iter().any(|e| e.to_lowercase() == result.to_lowercase()));
        }
    }
}
