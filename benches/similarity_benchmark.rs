use criterion::{Criterion, black_box, criterion_group, criterion_main};
use tui_snapshots::compare::{calculate_similarity, svg_structural_similarity};
use tui_snapshots::driver::terminal::Terminal;

fn rendered_svg(text: &str) -> String {
    let mut terminal = Terminal::new(120, 40);
    for row in 0..40 {
        terminal.feed(format!("\x1b[{};1H\x1b[3{}m{} {}", row + 1, row % 8, text, row).as_bytes());
    }
    terminal.screen().render_svg("bench")
}

fn benchmark_similarity(c: &mut Criterion) {
    let baseline = rendered_svg("baseline row");
    let candidate = rendered_svg("candidate row");

    c.bench_function("svg_structural_similarity", |b| {
        b.iter(|| svg_structural_similarity(black_box(&baseline), black_box(&candidate)))
    });

    let dir = tempfile::tempdir().expect("tempdir");
    let a = dir.path().join("a.svg");
    let b_path = dir.path().join("b.svg");
    std::fs::write(&a, &baseline).expect("write");
    std::fs::write(&b_path, &candidate).expect("write");

    c.bench_function("calculate_similarity_svg_files", |b| {
        b.iter(|| calculate_similarity(black_box(&a), black_box(&b_path)))
    });
}

criterion_group!(benches, benchmark_similarity);
criterion_main!(benches);
