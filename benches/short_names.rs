use bookfolder::services::{compute_short_names, make_unique};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

/// A book with chapters spread over a few folders, where every chapter name
/// appears once per folder so most labels collide.
fn colliding_book_paths(folders: usize, chapters: usize) -> Vec<String> {
    (0..folders)
        .flat_map(|f| {
            (0..chapters).map(move |c| format!("OEBPS/Part{f}/Text/chapter{c:03}.xhtml"))
        })
        .collect()
}

fn bench_short_names(c: &mut Criterion) {
    let unique: Vec<String> = (0..1000)
        .map(|c| format!("OEBPS/Text/chapter{c:04}.xhtml"))
        .collect();
    let colliding = colliding_book_paths(10, 100);

    c.bench_function("short_names_unique_1000", |b| {
        b.iter(|| compute_short_names(black_box(&unique)))
    });
    c.bench_function("short_names_colliding_1000", |b| {
        b.iter(|| compute_short_names(black_box(&colliding)))
    });
}

fn bench_make_unique(c: &mut Criterion) {
    let existing: Vec<String> = std::iter::once("image.png".to_string())
        .chain((1..500).map(|n| format!("image{n:04}.png")))
        .collect();

    c.bench_function("make_unique_500_taken", |b| {
        b.iter(|| make_unique(black_box("image.png"), existing.iter().map(String::as_str)))
    });
}

criterion_group!(benches, bench_short_names, bench_make_unique);
criterion_main!(benches);
