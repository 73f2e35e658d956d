// self
use crate::{_prelude::*, obs::CallStage};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedCall<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedCall<F> = F;

/// A span builder used by client layers.
#[derive(Clone, Debug)]
pub struct CallSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl CallSpan {
	/// Creates a new span tagged with the provided stage + call site.
	pub fn new(stage: CallStage, site: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("appnexus_client.call", stage = stage.as_str(), site);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (stage, site);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedCall<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Emits a warn-level event for conditions the client recovers from.
pub fn warn_event(stage: CallStage, message: &'static str, detail: &dyn Display) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(stage = stage.as_str(), detail = %detail, "{message}");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (stage, message, detail);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn warn_event_noop_without_tracing() {
		warn_event(CallStage::Guard, "rate limited", &"window 60s");
	}

	#[tokio::test]
	async fn instrument_wraps_future() {
		let span = CallSpan::new(CallStage::Call, "instrument_wraps_future");
		let value = span.instrument(async { 42 }).await;

		assert_eq!(value, 42);
	}
}
