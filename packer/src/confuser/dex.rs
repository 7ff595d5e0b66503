//! Dex confuser. Each method task has a level threshold; every task at or
//! below the configured level runs on every method of every dex entry.

use std::fmt;

use rand::Rng;

use super::{Confuser, Context};
use crate::dex::{ArrayData, DexCodec, DexMethod, Instruction};
use crate::error::Result;

pub const TAG: &str = "dex";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodTask {
    /// Appends an unreachable `fill-array-data-payload` with an odd element
    /// width, which decompilers that decode every payload reject.
    ArrayPayload,
}

/// Level thresholds, in application order.
pub const METHOD_TASKS: &[(u8, MethodTask)] = &[(1, MethodTask::ArrayPayload)];

pub fn enabled_tasks(level: u8) -> Vec<MethodTask> {
    METHOD_TASKS
        .iter()
        .filter(|(threshold, _)| *threshold <= level)
        .map(|(_, task)| *task)
        .collect()
}

impl fmt::Display for MethodTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodTask::ArrayPayload => f.write_str("array-payload"),
        }
    }
}

impl MethodTask {
    /// Returns whether the method was modified.
    pub fn apply<R: Rng + ?Sized>(self, method: &mut dyn DexMethod, rng: &mut R) -> bool {
        match self {
            MethodTask::ArrayPayload => append_array_payload(method, rng),
        }
    }
}

fn append_array_payload<R: Rng + ?Sized>(method: &mut dyn DexMethod, rng: &mut R) -> bool {
    if method.instruction_count() == 0
        || matches!(method.last_instruction(), Some(Instruction::ArrayData(_)))
    {
        return false;
    }
    let element_width: u16 = 2 * rng.gen_range(1..=9) + 1;
    let element_count: u32 = rng.gen_range(1..=6);
    let mut data = vec![0u8; element_width as usize * element_count as usize];
    rng.fill_bytes(&mut data);
    method.append_instruction(Instruction::ArrayData(ArrayData {
        element_width,
        element_count,
        data,
    }));
    true
}

pub struct DexConfuser<'c> {
    codec: &'c dyn DexCodec,
    tasks: Vec<MethodTask>,
}

impl<'c> DexConfuser<'c> {
    pub fn new(codec: &'c dyn DexCodec, level: u8) -> Self {
        Self {
            codec,
            tasks: enabled_tasks(level),
        }
    }
}

impl Confuser for DexConfuser<'_> {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn confuse(&mut self, cx: &mut Context<'_>) -> Result<()> {
        let log = cx.logger(TAG);
        if self.tasks.is_empty() {
            return Ok(());
        }

        for name in cx.package.dex_entries() {
            let bytes = cx.package.entry_bytes(&name)?;
            let mut dex = self.codec.decode(&bytes)?;
            let mut counts = vec![0usize; self.tasks.len()];

            for c in 0..dex.class_count() {
                let class = dex.class_mut(c);
                for m in 0..class.method_count() {
                    let method = class.method_mut(m);
                    for (task, count) in self.tasks.iter().zip(counts.iter_mut()) {
                        if task.apply(method, &mut *cx.rng) {
                            *count += 1;
                        }
                    }
                }
            }

            for (task, count) in self.tasks.iter().zip(&counts) {
                log.info(format_args!("{name}: {task} modified {count} methods"));
            }
            if counts.iter().all(|c| *c == 0) {
                continue;
            }

            dex.refresh();
            dex.shrink();
            let encoded = dex.encode()?;
            cx.package.replace_entry_bytes(&name, &encoded)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtectOptions;
    use crate::sink::RecordingSink;
    use crate::testutil::{self, FakeCodec};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn level_gates_tasks() {
        assert!(enabled_tasks(0).is_empty());
        assert_eq!(enabled_tasks(1), [MethodTask::ArrayPayload]);
        assert_eq!(enabled_tasks(u8::MAX), [MethodTask::ArrayPayload]);
    }

    #[test]
    fn payload_is_appended_once() {
        let mut method = testutil::FakeMethod::new(vec![Instruction::Op(0x12), Instruction::Op(0x0e)]);
        let mut rng = StdRng::seed_from_u64(21);
        assert!(MethodTask::ArrayPayload.apply(&mut method, &mut rng));
        assert!(!MethodTask::ArrayPayload.apply(&mut method, &mut rng));
        assert_eq!(method.instruction_count(), 3);

        match method.last_instruction() {
            Some(Instruction::ArrayData(payload)) => {
                assert_eq!(payload.element_width % 2, 1);
                assert!((3..=19).contains(&payload.element_width));
                assert!((1..=6).contains(&payload.element_count));
                assert_eq!(
                    payload.data.len(),
                    payload.element_width as usize * payload.element_count as usize
                );
            }
            other => panic!("expected payload, got {other:?}"),
        }
    }

    #[test]
    fn empty_methods_are_skipped() {
        let mut method = testutil::FakeMethod::new(Vec::new());
        let mut rng = StdRng::seed_from_u64(21);
        assert!(!MethodTask::ArrayPayload.apply(&mut method, &mut rng));
        assert_eq!(method.instruction_count(), 0);
    }

    #[test]
    fn rewrites_every_dex_entry() {
        let mut package = testutil::fixture_package();
        let options = ProtectOptions::default();
        let sink = RecordingSink::default();
        let mut rng = StdRng::seed_from_u64(4);
        let mut cx = Context::new(&mut package, &options, &mut rng, &sink);
        DexConfuser::new(&FakeCodec, 1).confuse(&mut cx).unwrap();

        let classes = testutil::decode_fake_dex(&package.entry_bytes("classes.dex").unwrap());
        let methods: Vec<_> = classes.iter().flatten().collect();
        assert_eq!(methods.len(), testutil::FAKE_DEX_METHODS);
        for method in methods {
            let payloads = method
                .iter()
                .filter(|i| matches!(i, Instruction::ArrayData(_)))
                .count();
            assert_eq!(payloads, 1);
            assert!(matches!(method.last(), Some(Instruction::ArrayData(_))));
        }
        assert_eq!(
            sink.messages_for(TAG),
            [format!("classes.dex: array-payload modified {} methods", testutil::FAKE_DEX_METHODS)]
        );
    }
}
