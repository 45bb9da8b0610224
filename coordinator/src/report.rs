use common::ResultMessage;

use crate::registry::Job;

/// Arma el resumen HTML de un job: una línea `<p>KIND: URL SALIDA</p>` por
/// tarea. Las líneas se ordenan por índice de tarea, así el reporte no
/// depende del orden en que llegaron los resultados.
pub fn render_report(job: &Job) -> String {
    let mut fragments: Vec<&ResultMessage> = job.results.iter().collect();
    fragments.sort_by_key(|r| r.index);

    let mut html = String::from("<html><body>\n");
    for r in fragments {
        html.push_str(&render_line(r));
        html.push('\n');
    }
    html.push_str("</body></html>\n");
    html
}

fn render_line(r: &ResultMessage) -> String {
    format!(
        "<p>{}: {} {}</p>",
        escape(r.kind.as_str()),
        escape(&r.locator),
        escape(&r.outcome.to_string())
    )
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{InMemoryJobRegistry, JobRegistry};
    use common::{AnalysisKind, Outcome, QueueAddr};

    fn job_with(arrivals: &[(u32, &str, &str, Outcome)]) -> Job {
        let reg = InMemoryJobRegistry::new();
        let id = reg.create_job(QueueAddr::new("reply"), arrivals.len() as u32);
        for (index, kind, url, outcome) in arrivals {
            reg.record_result(ResultMessage {
                job_id: id.clone(),
                locator: url.to_string(),
                outcome: outcome.clone(),
                kind: AnalysisKind::parse(kind).unwrap(),
                index: *index,
            });
        }
        reg.finalize(&id).unwrap()
    }

    #[test]
    fn reporte_no_depende_del_orden_de_llegada() {
        let out1 = Outcome::Output("out1".into());
        let out2 = Outcome::Output("out2".into());

        let a = job_with(&[
            (0, "POS", "urlA", out1.clone()),
            (1, "DEP", "urlB", out2.clone()),
        ]);
        let b = job_with(&[(1, "DEP", "urlB", out2), (0, "POS", "urlA", out1)]);

        let report = render_report(&a);
        assert!(report.contains("<p>POS: urlA out1</p>"));
        assert!(report.contains("<p>DEP: urlB out2</p>"));
        assert_eq!(report, render_report(&b));
    }

    #[test]
    fn errores_del_worker_aparecen_en_el_reporte() {
        let job = job_with(&[(0, "POS", "http://x/<a>", Outcome::error("timeout & reset"))]);
        let report = render_report(&job);
        assert!(report.contains("<p>POS: http://x/&lt;a&gt; Exception: timeout &amp; reset</p>"));
    }

    #[test]
    fn reporte_vacio_tiene_solo_el_esqueleto() {
        let job = job_with(&[]);
        assert_eq!(render_report(&job), "<html><body>\n</body></html>\n");
    }
}
