//! Both parser strategies must answer every operation identically

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rstest::rstest;

use pdf_cos::parser::{get_data_parser, DataParser, ParseTask, ParserStrategy, ValueType};
use pdf_cos::pdf::{ObjectStream, ParserInfo, PdfObject, Reference};
use pdf_cos::CryptInfo;

const SAMPLE: &[u8] = b"%PDF-1.7\n\
4 0 obj\n\
<< /Type /Page /Tag [1 2 3] /Kids [5 0 R 6 0 R] /Title (He said \\(hi\\)) /Id <48656C6C6F> \
/Scale -1.25 /Visible true % trailing comment\n/Name /A#20B >>\n\
endobj\n\
5 0 obj\n<< /Length 5 >>\nstream\nabcde\nendstream\nendobj\n";

fn parser(strategy: ParserStrategy) -> Arc<dyn DataParser> {
    get_data_parser(SAMPLE.to_vec(), strategy)
}

fn offset_of(needle: &[u8]) -> usize {
    SAMPLE.windows(needle.len()).position(|w| w == needle).unwrap()
}

#[rstest]
#[case::sync(ParserStrategy::Sync)]
#[case::background(ParserStrategy::Background)]
#[test_log::test]
fn test_scalars(#[case] strategy: ParserStrategy) {
    let parser = parser(strategy);

    let header = parser.parse_indirect_header_at(9).wait().unwrap().unwrap();
    assert_eq!(header.value, Reference::new(4, 0));
    assert_eq!(header.start, 9);

    let scale = offset_of(b"/Scale") + 6;
    let number = parser.parse_number_at(scale, true, true).wait().unwrap().unwrap();
    assert_eq!(number.value, -1.25);
    assert!(parser.parse_number_at(scale, true, false).wait().unwrap().is_none());
    assert!(parser.parse_number_at(scale, false, true).wait().unwrap().is_none());

    let visible = offset_of(b"/Visible") + 8;
    assert_eq!(parser.parse_bool_at(visible).wait().unwrap().unwrap().value, true);

    // comments are whitespace
    let name = parser.parse_name_at(offset_of(b"% trailing"), false).wait().unwrap().unwrap();
    assert_eq!(name.value, "Name");
    let escaped = parser.parse_name_at(name.next(), true).wait().unwrap().unwrap();
    assert_eq!(escaped.value, "/A B");
}

#[rstest]
#[case::sync(ParserStrategy::Sync)]
#[case::background(ParserStrategy::Background)]
#[test_log::test]
fn test_strings(#[case] strategy: ParserStrategy) {
    let parser = parser(strategy);

    let open = offset_of(b"(He said");
    let literal = parser.parse_literal_at(open).wait().unwrap().unwrap();
    assert_eq!(literal.value, b"He said (hi)".to_vec());
    assert_eq!(literal.end, offset_of(b"\\)) /Id") + 2);

    let hex = parser.parse_hex_at(offset_of(b"<4865")).wait().unwrap().unwrap();
    assert_eq!(hex.value, b"Hello".to_vec());
    assert_eq!(parser.get_value_type_at(hex.start).wait().unwrap(), Some(ValueType::StringHex));
}

#[rstest]
#[case::sync(ParserStrategy::Sync)]
#[case::background(ParserStrategy::Background)]
#[test_log::test]
fn test_arrays_and_bounds(#[case] strategy: ParserStrategy) {
    let parser = parser(strategy);

    let tag = offset_of(b"/Tag") + 4;
    let numbers = parser.parse_number_array_at(tag, false, false).wait().unwrap().unwrap();
    assert_eq!(numbers.value, vec![1.0, 2.0, 3.0]);
    let kids = parser.parse_ref_array_at(offset_of(b"/Kids") + 5).wait().unwrap().unwrap();
    assert_eq!(kids.value, vec![Reference::new(5, 0), Reference::new(6, 0)]);
    assert!(parser.parse_name_array_at(tag, false).wait().unwrap().is_none());

    let dict = parser.get_dict_bounds_at(offset_of(b"<< /Type")).wait().unwrap().unwrap();
    assert_eq!(SAMPLE[dict.end], b'>');
    assert_eq!(&SAMPLE[dict.end - 1..=dict.end], b">>");
    assert_eq!(parser.skip_value_at(dict.start).wait().unwrap(), Some(dict.end));

    let stream = parser.get_stream_bounds_at(offset_of(b"<< /Length")).wait().unwrap().unwrap();
    let content = stream.content_range().unwrap();
    assert_eq!(&SAMPLE[content], b"abcde");
    assert_eq!(&SAMPLE[stream.end - 8..=stream.end], b"endstream");
}

#[rstest]
#[case::sync(ParserStrategy::Sync)]
#[case::background(ParserStrategy::Background)]
#[test_log::test]
fn test_malformed_input_is_not_found(#[case] strategy: ParserStrategy) {
    let parser = get_data_parser(b"/Tag [1 2 3 << /Open (unterminated".to_vec(), strategy);
    assert!(parser.parse_number_array_at(5, false, false).wait().unwrap().is_none());
    assert!(parser.get_dict_bounds_at(12).wait().unwrap().is_none());
    assert!(parser.parse_literal_at(21).wait().unwrap().is_none());
    assert!(parser.parse_ref_at(0).wait().unwrap().is_none());
    assert!(parser.find_bytes_at(b"endobj", 0).wait().unwrap().is_none());

    let parser = get_data_parser(b"</A 1> <4G>".to_vec(), strategy);
    assert!(parser.get_value_type_at(0).wait().unwrap().is_none());
    assert!(parser.get_value_bounds_at(0).wait().unwrap().is_none());
    assert!(parser.parse_hex_at(7).wait().unwrap().is_none());
}

#[rstest]
#[case::sync(ParserStrategy::Sync)]
#[case::background(ParserStrategy::Background)]
#[test_log::test]
fn test_keyword_search(#[case] strategy: ParserStrategy) {
    let parser = parser(strategy);
    let first = parser.find_bytes_at(b"endobj", 0).wait().unwrap().unwrap();
    let last = parser.find_bytes_backward_at(b"endobj", parser.len() - 1).wait().unwrap().unwrap();
    assert!(first < last);
    assert_eq!(parser.slice_char_codes_at(first, first + 5).wait().unwrap(), b"endobj".to_vec());
}

#[test_log::test]
fn test_strategies_agree_on_every_offset() {
    let sync = get_data_parser(SAMPLE.to_vec(), ParserStrategy::Sync);
    let background = get_data_parser(SAMPLE.to_vec(), ParserStrategy::Background);

    for offset in 0..SAMPLE.len() {
        assert_eq!(
            sync.get_value_type_at(offset).wait().unwrap(),
            background.get_value_type_at(offset).wait().unwrap(),
            "value type at {}",
            offset
        );
        assert_eq!(
            sync.get_value_bounds_at(offset).wait().unwrap(),
            background.get_value_bounds_at(offset).wait().unwrap(),
            "bounds at {}",
            offset
        );
    }
}

#[test_log::test]
fn test_background_tasks_can_be_dropped() {
    let parser = get_data_parser(SAMPLE.to_vec(), ParserStrategy::Background);
    for offset in 0..64 {
        drop(parser.get_value_bounds_at(offset));
    }
    let tasks: Vec<_> = (0..3).map(|_| parser.parse_indirect_header_at(9)).collect();
    let headers = ParseTask::join_all(tasks).unwrap();
    assert!(headers.iter().all(|h| h.as_ref().map(|h| h.value) == Some(Reference::new(4, 0))));
}

#[rstest]
#[case::sync(ParserStrategy::Sync)]
#[case::background(ParserStrategy::Background)]
#[test_log::test]
fn test_object_stream_sub_objects(#[case] strategy: ParserStrategy) {
    let payload = b"3 0 9 9\n<</A 1>> <</B 2>>";
    let mut data = format!("7 0 obj << /Type /ObjStm /N 2 /First 8 /Length {} >> stream\n", payload.len()).into_bytes();
    data.extend_from_slice(payload);
    data.extend_from_slice(b"\nendstream endobj");

    let parser = get_data_parser(data, strategy);
    let (reference, info) = ParserInfo::from_indirect(parser, 0, |r| Some(CryptInfo::plain(r))).unwrap();
    assert_eq!(reference, Reference::new(7, 0));
    let container: ObjectStream = match PdfObject::parse(&info).unwrap() {
        PdfObject::ObjectStream(container) => container,
        other => panic!("expected an object stream, got {:?}", other),
    };

    let three = container.get_sub_object(3).unwrap().unwrap();
    let bytes = three.parser.slice_char_codes_at(three.bounds.start, three.bounds.end).wait().unwrap();
    assert_eq!(bytes, b"<</A 1>>".to_vec());
    assert_eq!(three.stream_id, Some(7));
    assert_eq!(three.reference(), Some(Reference::new(3, 0)));

    let nine = container.get_sub_object(9).unwrap().unwrap();
    let bytes = nine.parser.slice_char_codes_at(nine.bounds.start, nine.bounds.end).wait().unwrap();
    assert_eq!(bytes, b"<</B 2>>".to_vec());
    assert!(container.get_sub_object(99).unwrap().is_none());
}
