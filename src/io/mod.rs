pub mod input;

pub use input::{
    build_utterance_blocks, find_csv_files, read_conversation_turns, select_file_range,
};
