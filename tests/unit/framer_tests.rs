use agent_runner::worker::framer::{extract_framed, FrameScanner, FrameState, LineClass};
use agent_runner::worker::payload::Markers;

fn markers() -> Markers {
    Markers::with_tag("t1")
}

#[test]
fn wrapped_text_round_trips() {
    let markers = markers();
    let body = "{\"type\":\"text\",\"content\":\"hi\"}\n{\"type\":\"done\"}";

    assert_eq!(extract_framed(&markers.wrap(body), &markers), Some(body));
}

#[test]
fn noise_around_the_frame_is_excluded() {
    let markers = markers();
    let raw = format!(
        "Loading plugins...\n{}\nwarning: deprecated\n{}\ntrailing noise\n",
        markers.start, markers.end
    );

    assert_eq!(extract_framed(&raw, &markers), Some("warning: deprecated"));
}

#[test]
fn only_start_marker_is_not_framed() {
    let markers = markers();
    let raw = format!("{}\n{{\"type\":\"text\"}}\n", markers.start);

    assert_eq!(extract_framed(&raw, &markers), None);
}

#[test]
fn only_end_marker_is_not_framed() {
    let markers = markers();
    let raw = format!("{{\"type\":\"text\"}}\n{}\n", markers.end);

    assert_eq!(extract_framed(&raw, &markers), None);
}

#[test]
fn no_markers_is_not_framed() {
    assert_eq!(extract_framed("{\"type\":\"text\"}\n", &markers()), None);
}

#[test]
fn end_before_start_is_not_framed() {
    let markers = markers();
    let raw = format!("{}\nbody\n{}\n", markers.end, markers.start);

    assert_eq!(extract_framed(&raw, &markers), None);
}

#[test]
fn markers_without_whitespace_are_found() {
    let markers = markers();
    let raw = format!("junk{}payload{}junk", markers.start, markers.end);

    assert_eq!(extract_framed(&raw, &markers), Some("payload"));
}

#[test]
fn only_first_pair_is_used() {
    let markers = markers();
    let raw = format!(
        "{s}\nfirst\n{e}\n{s}\nsecond\n{e}\n",
        s = markers.start,
        e = markers.end
    );

    assert_eq!(extract_framed(&raw, &markers), Some("first"));
}

#[test]
fn scanner_walks_through_all_states() {
    let markers = markers();
    let mut scanner = FrameScanner::new(markers.clone());

    assert_eq!(scanner.feed("legacy line"), LineClass::Legacy("legacy line"));
    assert_eq!(scanner.state(), FrameState::Unframed);

    assert_eq!(scanner.feed(&markers.start), LineClass::Marker);
    assert_eq!(scanner.state(), FrameState::Inside);

    assert_eq!(scanner.feed("{\"type\":\"text\"}"), LineClass::Protocol("{\"type\":\"text\"}"));

    assert_eq!(scanner.feed(&markers.end), LineClass::Marker);
    assert_eq!(scanner.state(), FrameState::Closed);

    assert_eq!(scanner.feed("after"), LineClass::Noise("after"));
}

#[test]
fn scanner_handles_inline_markers() {
    let markers = markers();
    let mut scanner = FrameScanner::new(markers.clone());

    let line = format!("{}{{\"type\":\"text\"}}", markers.start);
    assert_eq!(scanner.feed(&line), LineClass::Protocol("{\"type\":\"text\"}"));

    let closing = format!("{{\"type\":\"done\"}}{}", markers.end);
    assert_eq!(scanner.feed(&closing), LineClass::Protocol("{\"type\":\"done\"}"));
    assert_eq!(scanner.state(), FrameState::Closed);
}

#[test]
fn scanner_ignores_a_second_start_marker() {
    let markers = markers();
    let mut scanner = FrameScanner::new(markers.clone());
    scanner.feed(&markers.start);
    scanner.feed(&markers.end);

    assert_eq!(scanner.feed(&markers.start), LineClass::Noise(markers.start.as_str()));
    assert_eq!(scanner.state(), FrameState::Closed);
}

#[test]
fn markers_are_unique_per_generation() {
    let first = Markers::generate();
    let second = Markers::generate();

    assert_ne!(first.start, second.start);
    assert_ne!(first.start, first.end);
}

#[test]
fn markers_are_detected_from_a_transcript() {
    let markers = Markers::generate();
    let raw = format!("noise\n{}", markers.wrap("body"));

    assert_eq!(Markers::detect(&raw), Some(markers));
    assert_eq!(Markers::detect("no markers here"), None);
}
