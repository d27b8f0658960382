//! Types et utilitaires pour les handlers d'actions UPnP.
//!
//! Les actions sont exécutées de manière asynchrone par le dispatcher SOAP
//! via des handlers enregistrés par le composeur du host :
//!
//! ```text
//! ActionData (arguments IN typés)
//!       ↓
//! ActionHandler (async)
//!       ↓
//! ActionOutcome (arguments OUT typés, dans l'ordre déclaré)
//! ```
//!
//! Un handler capture lui-même l'état dont il a besoin (typiquement un
//! [`ServiceState`](crate::hosting::ServiceState) cloné) ; le dispatcher ne
//! lui passe que les arguments d'entrée déjà validés.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use crate::variable_types::StateValue;

/// Arguments d'entrée d'une invocation, indexés par nom.
///
/// Les valeurs ont déjà été coercées vers le type de la variable d'état
/// associée avant d'atteindre le handler.
pub type ActionData = Arc<HashMap<String, StateValue>>;

/// Arguments de sortie d'une invocation, dans l'ordre déclaré.
pub type ActionOutcome = Vec<(String, StateValue)>;

/// Future retourné par un [`ActionHandler`].
pub type ActionFuture =
    Pin<Box<dyn Future<Output = Result<ActionOutcome, crate::actions::ActionError>> + Send>>;

/// Handler d'action UPnP asynchrone.
///
/// Retourne les arguments OUT en cas de succès, ou une
/// [`ActionError`](crate::actions::ActionError) qui sera encodée en SOAP
/// fault (code 501 par défaut, ou le code vendeur porté par l'erreur).
pub type ActionHandler = Arc<dyn Fn(ActionData) -> ActionFuture + Send + Sync>;

/// Macro pour créer facilement un [`ActionHandler`].
///
/// # Syntaxe
///
/// ```ignore
/// // sans contexte capturé
/// let handler = action_handler!(|data| {
///     let target = data.get("newTargetValue").cloned();
///     // logique métier, .await autorisé
///     Ok(vec![])
/// });
///
/// // avec contexte : chaque nom listé est cloné à chaque invocation,
/// // ce qui garde le handler `Fn` (le bloc async peut le consommer)
/// let state = host.state().clone();
/// let handler = action_handler!(move(state) |data| {
///     state.set("Status", data["newTargetValue"].clone())?;
///     Ok(vec![])
/// });
/// ```
///
/// Le bloc est automatiquement wrappé dans `async move`, boxé et arcé.
#[macro_export]
macro_rules! action_handler {
    (move($($ctx:ident),* $(,)?) |$data:ident| $body:block) => {{
        $(let $ctx = $ctx.clone();)*
        std::sync::Arc::new(move |$data: $crate::actions::ActionData| {
            $(let $ctx = $ctx.clone();)*
            Box::pin(async move $body) as $crate::actions::ActionFuture
        })
    }};
    (|$data:ident| $body:block) => {
        std::sync::Arc::new(move |$data: $crate::actions::ActionData| {
            Box::pin(async move $body) as $crate::actions::ActionFuture
        })
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable_types::StateValue;
    use std::collections::HashMap;

    #[test]
    fn test_macro_builds_handler() {
        let handler: ActionHandler = action_handler!(|data| {
            let echo = data
                .get("Input")
                .cloned()
                .unwrap_or(StateValue::String(String::new()));
            Ok(vec![("Output".to_string(), echo)])
        });

        let mut args = HashMap::new();
        args.insert("Input".to_string(), StateValue::String("ping".to_string()));

        let outcome = futures_block_on(handler(Arc::new(args))).unwrap();
        assert_eq!(outcome.len(), 1);
        assert_eq!(outcome[0].0, "Output");
        assert_eq!(outcome[0].1.to_upnp_string(), "ping");
    }

    #[test]
    fn test_macro_with_captured_context_stays_callable() {
        let prefix = Arc::new("re".to_string());
        let handler: ActionHandler = action_handler!(move(prefix) |data| {
            let _ = data;
            Ok(vec![(
                "Out".to_string(),
                StateValue::String(format!("{}ply", prefix)),
            )])
        });

        // le clone par invocation garde le handler appelable plusieurs fois
        for _ in 0..2 {
            let outcome = futures_block_on(handler(Arc::new(HashMap::new()))).unwrap();
            assert_eq!(outcome[0].1.to_upnp_string(), "reply");
        }
    }

    // Exécuteur minimal pour un future déjà prêt (les handlers de test ne
    // suspendent pas).
    fn futures_block_on<F: std::future::Future>(fut: F) -> F::Output {
        use std::sync::Arc;
        use std::task::{Context, Poll, Wake, Waker};

        struct NoopWake;
        impl Wake for NoopWake {
            fn wake(self: Arc<Self>) {}
        }

        let waker = Waker::from(Arc::new(NoopWake));
        let mut cx = Context::from_waker(&waker);
        let mut fut = Box::pin(fut);
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(out) => out,
            Poll::Pending => panic!("test handler future should be immediately ready"),
        }
    }
}
