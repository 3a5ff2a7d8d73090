use color_eyre::Report;
use color_eyre::eyre::eyre;

/// Reports a contract violation by the caller.
///
/// Debug builds abort on the spot. Release builds log and hand the error back so the
/// caller can bail out before any state is touched.
pub fn misuse(message: &str) -> Report {
    log::error!("{}", message);
    debug_assert!(false, "{}", message);
    eyre!(message.to_string())
}

pub fn next_slot(slot: usize, slot_count: usize) -> usize {
    (slot + 1) % slot_count
}

pub fn previous_slot(slot: usize, slot_count: usize) -> usize {
    (slot + slot_count - 1) % slot_count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_wrap_in_both_directions() {
        assert_eq!(next_slot(0, 3), 1);
        assert_eq!(next_slot(2, 3), 0);
        assert_eq!(previous_slot(0, 3), 2);
        assert_eq!(previous_slot(1, 3), 0);
        assert_eq!(previous_slot(0, 1), 0);
    }
}
