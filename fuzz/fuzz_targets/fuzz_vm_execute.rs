#![no_main]

use std::collections::BTreeMap;
use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use packdag::config::VmConfig;
use packdag::state::Ledger;
use packdag::storage::SledStorage;
use packdag::transition::Origin;
use packdag::vm::Vm;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytecode run from entry 0 on an empty ledger. Every outcome
    // is a result or an exception; gas and op limits bound the run.
    let Ok(storage) = SledStorage::open_temporary() else {
        return;
    };
    let ledger = Ledger::new(Arc::new(storage));
    let config = VmConfig {
        max_gas_per_call: 100_000,
        max_ops_per_call: 10_000,
    };
    let origin = Origin {
        hash: [1u8; 32],
        author: [2u8; 32],
        milestone: [0u8; 32],
    };
    let mut vm = Vm::new(
        &ledger,
        &config,
        data.to_vec(),
        origin.author,
        origin,
        100_000,
        BTreeMap::new(),
    );
    if vm.run(&[vec![0]]).is_ok() {
        let _ = vm.into_outputs();
    }
});
