pub mod dead_letter_event;
