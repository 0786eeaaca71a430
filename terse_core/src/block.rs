//! Block encoder and decoder.
//!
//! A frame's flat element stream is cut into logical blocks of `block_size`
//! elements. Each block is planned (bit width, base, signedness) from its own
//! slice only, so planning and packing fan out over the worker pool with no
//! cross-block state. Encoding is two-pass:
//!
//! 1. plan every block in parallel,
//! 2. lay the payloads out back to back (sequential prefix sum), carve the
//!    arena into disjoint slots and pack every block into its slot in parallel.
//!
//! A small-unsigned block whose sampled ceiling turns out to be too low fails
//! to pack; it is re-planned exactly and the packing pass runs once more.
//! Plans depend only on the data, the mode and the settings, never on
//! scheduling, so the output is identical for every degree of parallelism.

use rayon::prelude::*;

use crate::bitpack::{self, bits_for, packed_len};
use crate::element::{Element, ElementType};
use crate::error::{Result, TerseError};
use crate::pool;
use crate::settings::{Mode, Settings};
use crate::varint;

/// Widest bit width the small-unsigned mode will keep.
pub const SMALL_MAX_BITS: u8 = 4;

/// Approximate number of elements sampled by the small-unsigned probe.
const SMALL_PROBE_SAMPLES: usize = 64;

/// One encoded run of elements inside a frame's payload arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub(crate) count: usize,
    pub(crate) bit_width: u8,
    pub(crate) signed: bool,
    pub(crate) base: u64,
    pub(crate) offset: usize,
}

impl Block {
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn bit_width(&self) -> u8 {
        self.bit_width
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// Base value as a 64-bit word: sign-extended for signed blocks,
    /// zero-extended otherwise.
    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn payload_offset(&self) -> usize {
        self.offset
    }

    pub fn payload_len(&self) -> usize {
        packed_len(self.count, self.bit_width)
    }

    /// Serialized size of this block's header for elements of `ty`.
    pub fn header_len(&self, ty: ElementType) -> usize {
        header_len(self.count, ty)
    }
}

fn header_len(count: usize, ty: ElementType) -> usize {
    // element_count varint, bit_width, signed_flag, raw base
    varint::encoded_len(count as u64) + 2 + ty.width()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Plan {
    count: usize,
    bit_width: u8,
    signed: bool,
    base: u64,
    /// Planned from the small-unsigned probe rather than an exact scan.
    probed: bool,
}

impl Plan {
    fn payload_len(&self) -> usize {
        packed_len(self.count, self.bit_width)
    }

    fn cost(&self, ty: ElementType) -> usize {
        header_len(self.count, ty) + self.payload_len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Unsigned,
    Signed,
    Dual,
    SmallUnsigned,
}

impl Strategy {
    fn for_mode(mode: Mode, settings: &Settings) -> Self {
        match mode {
            Mode::Unsigned => Strategy::Unsigned,
            Mode::Signed => Strategy::Signed,
            Mode::SmallUnsigned => Strategy::SmallUnsigned,
            Mode::Default if settings.fast => Strategy::Unsigned,
            Mode::Default => Strategy::Dual,
        }
    }

    fn plan<T: Element>(self, values: &[T]) -> Plan {
        match self {
            Strategy::Unsigned => unsigned_plan(values),
            Strategy::Signed => signed_plan(values),
            Strategy::Dual => {
                let unsigned = unsigned_plan(values);
                let signed = signed_plan(values);
                if signed.bit_width < unsigned.bit_width {
                    signed
                } else {
                    unsigned
                }
            }
            Strategy::SmallUnsigned => small_probe_plan(values),
        }
    }
}

#[inline]
fn word<T: Element>(value: T, signed: bool) -> u64 {
    if signed {
        value.signed_word() as u64
    } else {
        value.unsigned_word()
    }
}

fn unsigned_plan<T: Element>(values: &[T]) -> Plan {
    let (lo, hi) = values
        .iter()
        .map(|v| v.unsigned_word())
        .fold((u64::MAX, u64::MIN), |(lo, hi), w| (lo.min(w), hi.max(w)));
    Plan {
        count: values.len(),
        bit_width: bits_for(hi.wrapping_sub(lo)),
        signed: false,
        base: lo,
        probed: false,
    }
}

fn signed_plan<T: Element>(values: &[T]) -> Plan {
    let (lo, hi) = values
        .iter()
        .map(|v| v.signed_word())
        .fold((i64::MAX, i64::MIN), |(lo, hi), w| (lo.min(w), hi.max(w)));
    Plan {
        count: values.len(),
        bit_width: bits_for(hi.wrapping_sub(lo) as u64),
        signed: true,
        base: lo as u64,
        probed: false,
    }
}

/// Cheap ceiling from a strided sample; base 0, 1 to 4 bits. A sample that
/// already needs more bits goes straight to the unsigned scheme.
fn small_probe_plan<T: Element>(values: &[T]) -> Plan {
    let stride = (values.len() / SMALL_PROBE_SAMPLES).max(1);
    let probe_max = values
        .iter()
        .step_by(stride)
        .map(|v| v.unsigned_word())
        .max()
        .unwrap_or(0);
    let width = bits_for(probe_max);
    if width > SMALL_MAX_BITS {
        return unsigned_plan(values);
    }
    Plan {
        count: values.len(),
        bit_width: width.max(1),
        signed: false,
        base: 0,
        probed: true,
    }
}

/// Exact small-unsigned plan after the probe was violated.
fn corrected_small_plan<T: Element>(values: &[T]) -> Result<Plan> {
    let max = values.iter().map(|v| v.unsigned_word()).max().unwrap_or(0);
    let width = bits_for(max);
    if width > SMALL_MAX_BITS {
        return Err(TerseError::Range(width));
    }
    Ok(Plan {
        count: values.len(),
        bit_width: width.max(1),
        signed: false,
        base: 0,
        probed: false,
    })
}

/// Plans one logical block, optionally split once at its midpoint.
fn plan_block<T: Element>(values: &[T], strategy: Strategy, refine: bool) -> Vec<Plan> {
    let whole = strategy.plan(values);
    if !refine || values.len() < 2 {
        return vec![whole];
    }
    let (left, right) = values.split_at(values.len() / 2);
    let (left, right) = (strategy.plan(left), strategy.plan(right));
    if left.cost(T::TYPE) + right.cost(T::TYPE) < whole.cost(T::TYPE) {
        vec![left, right]
    } else {
        vec![whole]
    }
}

fn pack_block<T: Element>(slot: &mut [u8], values: &[T], plan: &Plan) -> Result<()> {
    bitpack::pack_into(
        slot,
        values.iter().map(|v| word(*v, plan.signed)),
        plan.bit_width,
        plan.base,
    )
}

/// Splits `rest` into consecutive disjoint slots of the given lengths.
fn carve<'a, X>(mut rest: &'a mut [X], lens: impl Iterator<Item = usize>) -> Vec<&'a mut [X]> {
    let mut slots = Vec::new();
    for len in lens {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(len);
        slots.push(head);
        rest = tail;
    }
    slots
}

/// Encoded blocks plus the arena holding their payloads back to back.
#[derive(Debug)]
pub(crate) struct Encoded {
    pub blocks: Vec<Block>,
    pub payload: Vec<u8>,
}

/// Packs every plan into a fresh layout of `payload`; returns the indices of
/// plans whose values did not fit.
fn pack_all<T: Element>(
    values: &[T],
    plans: &[Plan],
    starts: &[usize],
    payload: &mut Vec<u8>,
) -> Vec<usize> {
    let total: usize = plans.iter().map(Plan::payload_len).sum();
    payload.clear();
    payload.resize(total, 0);
    let slots = carve(payload.as_mut_slice(), plans.iter().map(Plan::payload_len));
    slots
        .into_par_iter()
        .zip(plans.par_iter())
        .zip(starts.par_iter())
        .enumerate()
        .filter_map(|(i, ((slot, plan), &start))| {
            pack_block(slot, &values[start..start + plan.count], plan)
                .err()
                .map(|_| i)
        })
        .collect()
}

pub(crate) fn encode<T: Element>(values: &[T], mode: Mode, settings: &Settings) -> Result<Encoded> {
    let strategy = Strategy::for_mode(mode, settings);
    let refine = settings.refines_splits();
    let block_size = settings.block_size.max(1);

    pool::install(settings.workers(), || {
        let mut plans: Vec<Plan> = values
            .par_chunks(block_size)
            .map(|chunk| plan_block(chunk, strategy, refine))
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect();

        let starts: Vec<usize> = plans
            .iter()
            .scan(0usize, |next, plan| {
                let start = *next;
                *next += plan.count;
                Some(start)
            })
            .collect();

        let planned: usize = plans.iter().map(Plan::payload_len).sum();
        let mut payload = Vec::with_capacity(planned + block_size * T::TYPE.width());

        let failures = pack_all(values, &plans, &starts, &mut payload);
        if !failures.is_empty() {
            for &i in &failures {
                let slice = &values[starts[i]..starts[i] + plans[i].count];
                plans[i] = if plans[i].probed {
                    match corrected_small_plan(slice) {
                        Ok(plan) => {
                            log::debug!(
                                "block {} exceeded its sampled ceiling; re-encoded with {} bits",
                                i,
                                plan.bit_width
                            );
                            plan
                        }
                        Err(e) => {
                            log::debug!("block {}: {}; falling back to unsigned", i, e);
                            unsigned_plan(slice)
                        }
                    }
                } else {
                    unsigned_plan(slice)
                };
            }
            let failures = pack_all(values, &plans, &starts, &mut payload);
            if let Some(&i) = failures.first() {
                return Err(TerseError::Consistency(format!(
                    "block {} could not be packed with an exact plan",
                    i
                )));
            }
        }

        let mut offset = 0usize;
        let blocks = plans
            .iter()
            .map(|plan| {
                let block = Block {
                    count: plan.count,
                    bit_width: plan.bit_width,
                    signed: plan.signed,
                    base: plan.base,
                    offset,
                };
                offset += plan.payload_len();
                block
            })
            .collect();

        log::trace!(
            "encoded {} {} values into {} payload bytes",
            values.len(),
            T::TYPE,
            payload.len()
        );
        Ok(Encoded { blocks, payload })
    })
}

fn decode_block<T: Element>(block: &Block, payload: &[u8], out: &mut [T]) -> Result<()> {
    let bits = T::TYPE.bits();
    if block.bit_width > bits {
        return Err(TerseError::Consistency(format!(
            "bit width {} exceeds the {}-bit element type",
            block.bit_width, bits
        )));
    }
    let bytes = payload
        .get(block.offset..block.offset + block.payload_len())
        .ok_or_else(|| {
            TerseError::Consistency(format!(
                "block payload {}..{} lies outside the {}-byte frame payload",
                block.offset,
                block.offset + block.payload_len(),
                payload.len()
            ))
        })?;

    let (lo, hi, base) = if block.signed {
        let half = 1i128 << (bits - 1);
        (-half, half - 1, block.base as i64 as i128)
    } else {
        (0i128, (1i128 << bits) - 1, block.base as i128)
    };

    for (dst, offset) in out.iter_mut().zip(bitpack::offsets(bytes, block.count, block.bit_width)?) {
        let value = base + offset as i128;
        if value < lo || value > hi {
            return Err(TerseError::Consistency(format!(
                "decoded value {} is not representable as {}{}",
                value,
                if block.signed { "signed " } else { "" },
                T::TYPE
            )));
        }
        *dst = T::from_word(value as u64);
    }
    Ok(())
}

/// Decodes `blocks` into `out`, which must hold exactly the sum of the block
/// counts. Each block writes its own pre-carved slot of `out`.
pub(crate) fn decode_into<T: Element>(
    blocks: &[Block],
    payload: &[u8],
    out: &mut [T],
    workers: usize,
) -> Result<()> {
    let total: usize = blocks.iter().map(|b| b.count).sum();
    if total != out.len() {
        return Err(TerseError::Consistency(format!(
            "blocks hold {} elements but {} were expected",
            total,
            out.len()
        )));
    }
    pool::install(workers, || {
        let slots = carve(out, blocks.iter().map(|b| b.count));
        slots
            .into_par_iter()
            .zip(blocks.par_iter())
            .try_for_each(|(slot, block)| decode_block(block, payload, slot))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(block_size: usize) -> Settings {
        Settings {
            block_size,
            ..Settings::default()
        }
    }

    fn round_trip<T: Element>(values: &[T], mode: Mode, settings: &Settings) -> Encoded {
        let encoded = encode(values, mode, settings).unwrap();
        let mut out = vec![T::from_word(0); values.len()];
        decode_into(&encoded.blocks, &encoded.payload, &mut out, settings.workers()).unwrap();
        assert_eq!(out, values, "mode {mode} must round-trip");
        encoded
    }

    #[test]
    fn unsigned_mode_uses_min_as_base() {
        let values: Vec<u16> = vec![1000, 1003, 1001, 1007];
        let encoded = round_trip(&values, Mode::Unsigned, &settings(4096));
        let block = encoded.blocks[0];
        assert_eq!(block.base(), 1000);
        assert_eq!(block.bit_width(), 3);
        assert!(!block.is_signed());
    }

    #[test]
    fn signed_mode_packs_negative_ranges_tightly() {
        let values: Vec<i32> = vec![-3, 4, 2, -1];
        let encoded = round_trip(&values, Mode::Signed, &settings(4096));
        let block = encoded.blocks[0];
        assert!(block.is_signed());
        assert_eq!(block.base() as i64, -3);
        assert_eq!(block.bit_width(), 3);
    }

    #[test]
    fn default_mode_picks_the_narrower_view() {
        // As unsigned words -1 and 1 are 2^32 apart; as signed they are 2 apart.
        let values: Vec<i32> = vec![-1, 1, 0];
        let encoded = round_trip(&values, Mode::Default, &settings(4096));
        assert!(encoded.blocks[0].is_signed());
        assert_eq!(encoded.blocks[0].bit_width(), 2);

        // Unsigned overloads: 0 and u16::MAX are 1 apart in the signed view.
        let overloads: Vec<u16> = vec![0, u16::MAX, 0, u16::MAX];
        let encoded = round_trip(&overloads, Mode::Default, &settings(4096));
        assert_eq!(encoded.blocks[0].bit_width(), 1);

        // Ties favour unsigned.
        let plain: Vec<u8> = vec![1, 2, 3];
        let encoded = round_trip(&plain, Mode::Default, &settings(4096));
        assert!(!encoded.blocks[0].is_signed());
    }

    #[test]
    fn fast_default_uses_unsigned_scheme() {
        let values: Vec<i32> = vec![-1, 1, 0];
        let fast = Settings {
            fast: true,
            ..settings(4096)
        };
        let encoded = round_trip(&values, Mode::Default, &fast);
        assert!(!encoded.blocks[0].is_signed());
        assert_eq!(encoded.blocks[0].bit_width(), 32);
    }

    #[test]
    fn constant_blocks_have_empty_payload() {
        let values = vec![7u32; 100];
        let encoded = round_trip(&values, Mode::Unsigned, &settings(4096));
        assert_eq!(encoded.blocks[0].bit_width(), 0);
        assert!(encoded.payload.is_empty());
    }

    #[test]
    fn block_count_is_ceil_of_len_over_block_size() {
        let values: Vec<u32> = (0..1000).collect();
        let encoded = round_trip(&values, Mode::Unsigned, &settings(128));
        assert_eq!(encoded.blocks.len(), 8);
        assert_eq!(encoded.blocks[7].count(), 1000 - 7 * 128);
        for block in &encoded.blocks {
            assert_eq!(block.payload_len(), packed_len(block.count(), block.bit_width()));
        }
    }

    #[test]
    fn small_unsigned_resolves_binary_data_to_one_bit() {
        let values: Vec<u32> = (0..10_000u32).map(|i| (i * 7 + i / 3) % 2).collect();
        let encoded = round_trip(&values, Mode::SmallUnsigned, &settings(4096));
        assert!(encoded.blocks.iter().all(|b| b.bit_width() == 1 && b.base() == 0));
    }

    #[test]
    fn small_unsigned_corrects_a_violated_probe() {
        // The probe samples every 64th element of a 4096 block; a 9 hidden
        // off-stride needs 4 bits.
        let mut values = vec![1u16; 4096];
        values[65] = 9;
        let encoded = round_trip(&values, Mode::SmallUnsigned, &settings(4096));
        assert_eq!(encoded.blocks[0].bit_width(), 4);
        assert_eq!(encoded.blocks[0].base(), 0);
    }

    #[test]
    fn small_unsigned_falls_back_to_unsigned_when_range_is_wide() {
        let mut values = vec![1u16; 4096];
        values[65] = 40_000;
        let encoded = round_trip(&values, Mode::SmallUnsigned, &settings(4096));
        assert_eq!(encoded.blocks[0].bit_width(), bits_for(40_000 - 1));
        assert_eq!(encoded.blocks[0].base(), 1);

        // negative values look huge in the unsigned view
        let negative: Vec<i16> = vec![-4, -3, -2, -1];
        round_trip(&negative, Mode::SmallUnsigned, &settings(4096));
    }

    #[test]
    fn small_setting_splits_only_when_strictly_smaller() {
        let mut values = vec![0u32; 512];
        for v in values.iter_mut().skip(256) {
            *v = 1 << 20;
        }
        let small = Settings {
            small: true,
            ..settings(512)
        };
        let encoded = round_trip(&values, Mode::Unsigned, &small);
        assert_eq!(encoded.blocks.len(), 2);
        assert!(encoded.blocks.iter().all(|b| b.bit_width() == 0));

        let uniform: Vec<u32> = (0..512).map(|i| i % 16).collect();
        let encoded = round_trip(&uniform, Mode::Unsigned, &small);
        assert_eq!(encoded.blocks.len(), 1);

        let fast_and_small = Settings {
            fast: true,
            ..small
        };
        let encoded = round_trip(&values, Mode::Unsigned, &fast_and_small);
        assert_eq!(encoded.blocks.len(), 1);
    }

    #[test]
    fn extreme_values_round_trip_in_every_mode() {
        let values: Vec<i64> = vec![i64::MIN, i64::MAX, 0, -1, 1];
        let unsigned: Vec<u64> = vec![u64::MAX, 0, 1 << 63, 42];
        for mode in Mode::ALL {
            round_trip(&values, mode, &settings(3));
            round_trip(&unsigned, mode, &settings(3));
        }
    }

    #[test]
    fn output_is_independent_of_parallelism() {
        let values: Vec<u16> = (0..50_000u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 20) as u16).collect();
        let reference = encode(
            &values,
            Mode::Default,
            &Settings {
                degree_of_parallelism: 0.0,
                ..settings(256)
            },
        )
        .unwrap();
        for dop in [0.5, 1.0] {
            let other = encode(
                &values,
                Mode::Default,
                &Settings {
                    degree_of_parallelism: dop,
                    ..settings(256)
                },
            )
            .unwrap();
            assert_eq!(other.blocks, reference.blocks);
            assert_eq!(other.payload, reference.payload);
        }
    }

    #[test]
    fn decode_rejects_unrepresentable_values() {
        let block = Block {
            count: 1,
            bit_width: 8,
            signed: false,
            base: 200,
            offset: 0,
        };
        let mut out = [0u8; 1];
        assert!(matches!(
            decode_into(&[block], &[100], &mut out, 1),
            Err(TerseError::Consistency(_))
        ));
    }

    #[test]
    fn decode_rejects_count_mismatch() {
        let encoded = encode(&[1u8, 2, 3], Mode::Unsigned, &settings(4096)).unwrap();
        let mut out = [0u8; 4];
        assert!(decode_into(&encoded.blocks, &encoded.payload, &mut out, 1).is_err());
    }
}
