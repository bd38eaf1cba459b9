use base64::{Engine as _, engine::general_purpose::STANDARD};
use rquickjs::{Coerced, Ctx, Function};

pub(super) fn base64_encode<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<Function<'js>> {
    Function::new(ctx.clone(), |input: Coerced<String>| STANDARD.encode(input.0))?
        .with_name("base64Encode")
}
