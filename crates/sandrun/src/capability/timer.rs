use std::time::Duration;

use rquickjs::{
    Coerced, Ctx, Function,
    function::{Async, Opt},
};

pub(super) fn sleep<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<Function<'js>> {
    Function::new(
        ctx.clone(),
        Async(|ms: Opt<Coerced<f64>>| {
            let delay = delay_from_millis(ms.0.map_or(0.0, |ms| ms.0));
            async move { tokio::time::sleep(delay).await }
        }),
    )?
    .with_name("sleep")
}

// NaN, infinities and negatives sleep for zero.
fn delay_from_millis(ms: f64) -> Duration {
    if !ms.is_finite() || ms <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(ms / 1000.0).unwrap_or(Duration::MAX)
}
