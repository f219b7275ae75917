//! Robustness properties: arbitrary bytes never panic the decoder, lengths
//! stay within the architectural limit, and failure is always the uniform
//! no-decode outcome.

#![cfg(not(target_arch = "wasm32"))]

mod common;

use proptest::prelude::*;
use tern_ir::ExitKind;
use tern_x86::decode::Verdict;
use tern_x86::MAX_INST_LEN;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 4096,
        .. ProptestConfig::default()
    })]

    #[test]
    fn decode_one_never_panics(
        bytes in proptest::collection::vec(any::<u8>(), 0..=18),
        pc in any::<u64>(),
    ) {
        let (block, outcome) = common::lift(&bytes, pc);

        prop_assert!(outcome.len <= MAX_INST_LEN,
            "len {} for {bytes:02x?}", outcome.len);

        if outcome.len == 0 {
            prop_assert_eq!(outcome.verdict, Verdict::Stop);
            prop_assert_eq!(outcome.kind, Some(ExitKind::NoDecode));
            // The failure path always terminates the block at the faulting
            // address.
            let Some((_, kind)) = block.next else {
                return Err(TestCaseError::fail("failure without a block exit"));
            };
            prop_assert_eq!(kind, ExitKind::NoDecode);
        }
    }

    #[test]
    fn stop_outcomes_always_carry_a_kind(
        bytes in proptest::collection::vec(any::<u8>(), 1..=15),
    ) {
        let (block, outcome) = common::lift(&bytes, 0x1000);
        if outcome.verdict == Verdict::Stop {
            prop_assert!(outcome.kind.is_some());
            prop_assert!(block.next.is_some());
        } else {
            prop_assert!(block.next.is_none());
        }
    }
}
