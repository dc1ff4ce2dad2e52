// Demonstrates the frame codec and record parser without opening a socket.
//
// Encodes a small ASTM message into frames, decodes them back, and parses
// the resulting records into their field trees.

use astm_gateway::codec::{decode_frame, encode_message, DecodeOutcome};
use astm_gateway::record::{parse_record, Delimiters};

fn main() {
    println!("ASTM Gateway Codec Demo");
    println!("=======================");

    let records = [
        "H|\\^&|||cobas 6000^1|||||||P|1|20240315143022",
        "P|1||12345^^^MRN",
        "O|1|SID001||^^^GLU|||20240315143000|||||A||||Serum",
        "R|1|^^^GLU|98|mg/dL|70-110|N||F||tech||20240315143022",
        "L|1|N",
    ];

    println!("\nEncoding {} records as frames:", records.len());
    let mut fn_ = 0u8;
    let mut all_frames = Vec::new();
    for line in &records {
        let mut data = line.as_bytes().to_vec();
        data.push(b'\r');
        let (frames, next) = encode_message(fn_, &data);
        println!("  {line:?} -> {} frame(s), fn starts at {fn_}", frames.len());
        fn_ = next;
        all_frames.extend(frames);
    }

    println!("\nDecoding frames back:");
    let delims = Delimiters::default();
    for frame in &all_frames {
        let (outcome, consumed) = decode_frame(frame);
        match outcome {
            DecodeOutcome::Frame { fn_, data, terminal } => {
                let line = String::from_utf8_lossy(&data);
                let line = line.strip_suffix('\r').unwrap_or(&line);
                println!("  fn={fn_} terminal={terminal} consumed={consumed}: {line}");

                let record = parse_record(line, &delims).unwrap();
                println!("    type={:?} field_count={}", record.record_type(), record.fields.len());
            }
            other => println!("  unexpected outcome: {other:?}"),
        }
    }

    println!("\nDone.");
}
