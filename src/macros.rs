/// Run `$f` with `$val` temporarily replaced by `$tmp`, then restore the
/// original value afterwards.
///
/// Not currently called (see `regalloc::invoke_range`'s doc comment for why
/// its original use case turned out not to need a snapshot/restore, and
/// `regalloc::mod::allocate_blocked` for why eviction turned out to commit
/// directly rather than probe-then-restore). Kept exported since it is the
/// teacher's own macro and still cheap to carry.
#[macro_export]
macro_rules! with_reset(
    ($val:expr, $tmp:expr, $f:block) => (
        {
            let old_value = $val;
            $val = $tmp;

            let block_val = $f;

            $val = old_value;

            block_val
        }
    );
);

/// Join the `Display` representation of every item in `$items` with
/// `$connector`, formatting each with `$fmt`.
#[macro_export]
macro_rules! connect {
    ($items:expr, $fmt:expr, $connector:expr) => {
        $items
            .iter()
            .map(|t| format!($fmt, t))
            .collect::<Vec<_>>()
            .join($connector)
    };
}
