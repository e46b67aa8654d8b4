use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::models::{canonical_speaker_label, SalesTurn, UtteranceBlock};

/// Columns every conversation CSV must carry.
const REQUIRED_COLUMNS: [&str; 4] = ["Conversation", "Chunk_id", "Speaker", "Text"];

/// List the conversation CSV files in a directory, sorted by path.
pub fn find_csv_files(input_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(input_dir)
        .with_context(|| format!("Failed to read input directory: {input_dir:?}"))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
        })
        .collect();
    files.sort();

    if files.is_empty() {
        bail!("no csv files found in {input_dir:?}");
    }
    Ok(files)
}

/// Select a 1-based inclusive range from the sorted file list.
pub fn select_file_range(files: &[PathBuf], from_idx: usize, to_idx: usize) -> Result<&[PathBuf]> {
    if files.is_empty() {
        bail!("no files available");
    }
    if from_idx < 1 {
        bail!("from_idx must be >= 1");
    }
    if to_idx < from_idx {
        bail!("to_idx must be >= from_idx");
    }
    if to_idx > files.len() {
        bail!("to_idx ({to_idx}) is out of range, max={}", files.len());
    }
    Ok(&files[from_idx - 1..to_idx])
}

/// Read one conversation CSV into ordered turns.
///
/// Rows without a numeric `Chunk_id` are skipped; the remaining rows are
/// stably sorted by it. A blank `Conversation` cell falls back to the file
/// stem. Speaker labels are canonicalized and text trimmed on the way in.
pub fn read_conversation_turns(path: &Path) -> Result<Vec<SalesTurn>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open csv file: {path:?}"))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read csv header: {path:?}"))?
        .clone();
    let index = index_columns(&headers);
    for column in REQUIRED_COLUMNS {
        if !index.contains_key(column) {
            bail!("missing required column {column:?} in {path:?}");
        }
    }

    let fallback_conversation_id = file_stem(path);
    let mut turns = Vec::with_capacity(64);
    for record in reader.records() {
        let record = record.with_context(|| format!("Failed to read csv row: {path:?}"))?;
        let Ok(turn_id) = get_field(&record, index["Chunk_id"]).trim().parse::<i64>() else {
            continue;
        };
        let mut conversation_id = get_field(&record, index["Conversation"]).trim().to_string();
        if conversation_id.is_empty() {
            conversation_id = fallback_conversation_id.clone();
        }
        turns.push(SalesTurn {
            conversation_id,
            turn_id,
            speaker: canonical_speaker_label(get_field(&record, index["Speaker"])),
            text: get_field(&record, index["Text"]).trim().to_string(),
        });
    }

    turns.sort_by_key(|turn| turn.turn_id);
    Ok(turns)
}

/// Merge consecutive same-speaker turns into utterance blocks.
///
/// Block indexes are 1-based and conversation-scoped. Continuation rows with
/// empty text are dropped; non-empty continuations join with a newline.
pub fn build_utterance_blocks(turns: &[SalesTurn]) -> Vec<UtteranceBlock> {
    let mut blocks: Vec<UtteranceBlock> = Vec::with_capacity(turns.len());
    for turn in turns {
        match blocks.last_mut() {
            Some(last) if last.ground_truth_speaker == turn.speaker => {
                if turn.text.trim().is_empty() {
                    continue;
                }
                if last.text.trim().is_empty() {
                    last.text = turn.text.clone();
                } else {
                    last.text.push('\n');
                    last.text.push_str(&turn.text);
                }
            }
            _ => blocks.push(UtteranceBlock {
                conversation_id: turn.conversation_id.clone(),
                utterance_index: blocks.len() as u32 + 1,
                ground_truth_speaker: turn.speaker.clone(),
                text: turn.text.clone(),
            }),
        }
    }
    blocks
}

fn index_columns(headers: &csv::StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(i, header)| {
            let mut name = header.trim();
            if i == 0 {
                name = name.trim_start_matches('\u{feff}');
            }
            (name.to_string(), i)
        })
        .collect()
}

fn get_field<'r>(record: &'r csv::StringRecord, idx: usize) -> &'r str {
    record.get(idx).unwrap_or("")
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use crate::models::{SPEAKER_CUSTOMER, SPEAKER_SALES_REP};

    fn turn(id: i64, speaker: &str, text: &str) -> SalesTurn {
        SalesTurn {
            conversation_id: "conv_a".to_string(),
            turn_id: id,
            speaker: speaker.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_blocks_merge_consecutive_same_speaker_turns() {
        let turns = vec![
            turn(1, SPEAKER_SALES_REP, "Hello!"),
            turn(2, SPEAKER_SALES_REP, "This is Dana from Acme."),
            turn(3, SPEAKER_CUSTOMER, "Hi Dana."),
            turn(4, SPEAKER_SALES_REP, "How are you today?"),
        ];

        let blocks = build_utterance_blocks(&turns);

        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].utterance_index, 1);
        assert_eq!(blocks[0].text, "Hello!\nThis is Dana from Acme.");
        assert_eq!(blocks[1].ground_truth_speaker, SPEAKER_CUSTOMER);
        assert_eq!(blocks[2].utterance_index, 3);
    }

    #[test]
    fn test_blocks_drop_empty_continuation_rows() {
        let turns = vec![
            turn(1, SPEAKER_CUSTOMER, "Hello?"),
            turn(2, SPEAKER_CUSTOMER, "   "),
            turn(3, SPEAKER_CUSTOMER, "Anyone there?"),
        ];

        let blocks = build_utterance_blocks(&turns);

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "Hello?\nAnyone there?");
    }

    #[test]
    fn test_blocks_alternating_speakers_never_merge() {
        let turns = vec![
            turn(1, SPEAKER_SALES_REP, "a"),
            turn(2, SPEAKER_CUSTOMER, "b"),
            turn(3, SPEAKER_SALES_REP, "c"),
        ];
        assert_eq!(build_utterance_blocks(&turns).len(), 3);
    }

    #[test]
    fn test_select_file_range_bounds() {
        let files: Vec<PathBuf> = (1..=3).map(|i| PathBuf::from(format!("{i}.csv"))).collect();

        assert_eq!(select_file_range(&files, 1, 3).unwrap().len(), 3);
        assert_eq!(select_file_range(&files, 2, 2).unwrap().len(), 1);
        assert!(select_file_range(&files, 0, 2).is_err());
        assert!(select_file_range(&files, 3, 2).is_err());
        assert!(select_file_range(&files, 1, 4).is_err());
    }

    #[test]
    fn test_read_conversation_turns_sorts_and_canonicalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conv_b.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "Conversation,Chunk_id,Speaker,Text,Embedding").unwrap();
        writeln!(file, "conv_b,2,**Customer,\"Sure, go ahead.\",[]").unwrap();
        writeln!(file, "conv_b,1,sales rep,\"Hi, do you have a minute?\",[]").unwrap();
        writeln!(file, "conv_b,x,Customer,skipped row,[]").unwrap();
        writeln!(file, ",3,Sales Rep,\"Great, thanks!\",[]").unwrap();

        let turns = read_conversation_turns(&path).unwrap();

        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].turn_id, 1);
        assert_eq!(turns[0].speaker, SPEAKER_SALES_REP);
        assert_eq!(turns[1].speaker, SPEAKER_CUSTOMER);
        assert_eq!(turns[1].text, "Sure, go ahead.");
        // Blank conversation cell falls back to the file stem.
        assert_eq!(turns[2].conversation_id, "conv_b");
    }

    #[test]
    fn test_read_conversation_turns_requires_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "Conversation,Speaker,Text\nconv,a,b\n").unwrap();

        let err = read_conversation_turns(&path).unwrap_err();
        assert!(err.to_string().contains("Chunk_id"));
    }

    #[test]
    fn test_find_csv_files_errors_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        assert!(find_csv_files(dir.path()).is_err());
    }
}
