use std::collections::{HashMap, HashSet};

/// Label made of the last `level` segments of `book_path`; the whole path
/// once `level` reaches its depth.
fn build_short_name(book_path: &str, level: usize) -> String {
    let pieces: Vec<&str> = book_path.split('/').collect();
    if level >= pieces.len() {
        return book_path.to_string();
    }
    pieces[pieces.len() - level..].join("/")
}

/// Computes the shortest unique display label for every book path.
///
/// Every path starts out labelled with its filename. Paths whose labels
/// collide are widened one trailing segment at a time until the label is
/// unique or covers the whole path. A label that already covers its whole
/// path stays put while the longer paths it collides with keep widening, so
/// labels are unique as displayed. Paths that never collide keep their bare
/// filename. Collisions are global to the tree, so this must be rerun over
/// all paths after any add, rename, or move.
pub fn compute_short_names<S: AsRef<str>>(book_paths: &[S]) -> HashMap<String, String> {
    let mut short_names: HashMap<String, String> = HashMap::with_capacity(book_paths.len());
    let mut by_name: HashMap<String, Vec<String>> = HashMap::new();
    let mut duplicates: HashSet<String> = HashSet::new();

    for path in book_paths {
        let path = path.as_ref();
        if short_names.contains_key(path) {
            continue;
        }
        let name = build_short_name(path, 1);
        short_names.insert(path.to_string(), name.clone());
        let owners = by_name.entry(name.clone()).or_default();
        owners.push(path.to_string());
        if owners.len() > 1 {
            duplicates.insert(name);
        }
    }

    let mut level = 1;
    while !duplicates.is_empty() {
        level += 1;
        let todo: Vec<String> = duplicates.drain().collect();
        for name in todo {
            let Some(paths) = by_name.remove(&name) else {
                continue;
            };
            for path in paths {
                let widened = build_short_name(&path, level);
                short_names.insert(path.clone(), widened.clone());
                let owners = by_name.entry(widened.clone()).or_default();
                owners.push(path);
                if owners.len() > 1 {
                    duplicates.insert(widened);
                }
            }
        }
    }

    short_names
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_build_short_name_levels() {
        assert_eq!(build_short_name("OEBPS/Text/ch1.xhtml", 1), "ch1.xhtml");
        assert_eq!(build_short_name("OEBPS/Text/ch1.xhtml", 2), "Text/ch1.xhtml");
        assert_eq!(build_short_name("OEBPS/Text/ch1.xhtml", 3), "OEBPS/Text/ch1.xhtml");
        assert_eq!(build_short_name("OEBPS/Text/ch1.xhtml", 7), "OEBPS/Text/ch1.xhtml");
        assert_eq!(build_short_name("ch1.xhtml", 1), "ch1.xhtml");
    }

    #[test]
    fn test_colliding_names_widen() {
        let names = compute_short_names(&[
            "OEBPS/Text/ch1.xhtml",
            "OEBPS/Other/ch1.xhtml",
            "OEBPS/Styles/style.css",
        ]);
        assert_eq!(names["OEBPS/Text/ch1.xhtml"], "Text/ch1.xhtml");
        assert_eq!(names["OEBPS/Other/ch1.xhtml"], "Other/ch1.xhtml");
        assert_eq!(names["OEBPS/Styles/style.css"], "style.css");
    }

    #[test]
    fn test_full_path_label_does_not_block_longer_paths() {
        let names = compute_short_names(&["ch1.xhtml", "Text/ch1.xhtml", "A/Text/ch1.xhtml"]);
        assert_eq!(names["ch1.xhtml"], "ch1.xhtml");
        assert_eq!(names["Text/ch1.xhtml"], "Text/ch1.xhtml");
        assert_eq!(names["A/Text/ch1.xhtml"], "A/Text/ch1.xhtml");
    }

    #[test]
    fn test_only_colliding_group_is_widened() {
        let names = compute_short_names(&[
            "a/x/img.png",
            "b/x/img.png",
            "a/y/note.txt",
            "b/z/note.txt",
        ]);
        assert_eq!(names["a/x/img.png"], "a/x/img.png");
        assert_eq!(names["b/x/img.png"], "b/x/img.png");
        assert_eq!(names["a/y/note.txt"], "y/note.txt");
        assert_eq!(names["b/z/note.txt"], "z/note.txt");
    }

    #[test]
    fn test_empty_input() {
        let names = compute_short_names::<&str>(&[]);
        assert!(names.is_empty());
    }

    proptest! {
        #[test]
        fn prop_short_names_are_unique_suffixes(
            paths in proptest::collection::hash_set("[ab]{1,2}(/[ab]{1,2}){0,3}\\.x", 1..24)
        ) {
            let paths: Vec<String> = paths.into_iter().collect();
            let names = compute_short_names(&paths);

            prop_assert_eq!(names.len(), paths.len());
            let distinct: HashSet<&String> = names.values().collect();
            prop_assert_eq!(distinct.len(), paths.len());
            for path in &paths {
                prop_assert!(path.ends_with(names[path].as_str()));
            }
        }
    }
}
