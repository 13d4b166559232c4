use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use racewatch::dom::{Document, Selector};
use racewatch::model::decode_laps;

fn leaderboard_html(rows: usize) -> String {
    let mut html = String::from("<body><div id=\"racingupdates\"><ul id=\"leaderboard\">");
    for i in 0..rows {
        html.push_str(&format!(
            "<li data-driver-id=\"{}\" class=\"row\"><span class=\"name\">Driver {}</span><span class=\"completion\">{}.00%</span></li>",
            i, i, i % 100
        ));
    }
    html.push_str("</ul></div></body>");
    html
}

/// Bench: selector matching over a 100-row leaderboard
fn bench_select_rows(c: &mut Criterion) {
    let doc = Document::parse_html(&leaderboard_html(100));
    let rows = Selector::parse("#leaderboard > li[data-driver-id]").unwrap();
    let one = Selector::parse("#racingupdates li[data-driver-id='57'] .completion").unwrap();

    c.bench_function("select_all_rows", |b| {
        b.iter(|| doc.read(|dom| black_box(dom.select_all(&rows, dom.root()).len())))
    });
    c.bench_function("select_first_deep", |b| {
        b.iter(|| doc.read(|dom| black_box(dom.select_first(&one, dom.root()))))
    });
}

/// Bench: decoding a 100-lap, 20-interval participant
fn bench_decode_laps(c: &mut Criterion) {
    let intervals: Vec<String> = (0..2000).map(|i| format!("{}.{}", 900 + i % 50, i % 10)).collect();
    let encoded = STANDARD.encode(intervals.join(","));

    c.bench_function("decode_laps_100x20", |b| {
        b.iter(|| decode_laps(black_box(&encoded), 100, 20).unwrap())
    });
}

criterion_group!(benches, bench_select_rows, bench_decode_laps);
criterion_main!(benches);
