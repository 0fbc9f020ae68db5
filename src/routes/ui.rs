use axum::{response::Html, routing::get, Router};

pub fn router() -> Router {
    Router::new().route("/", get(index))
}

async fn index() -> Html<&'static str> {
    Html(r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>Chat with your data</title>
  <style>
    body { font-family: Arial, sans-serif; margin: 0; color: #1d1d1f; display: flex; min-height: 100vh; }
    aside { width: 300px; background: #f6f7f9; border-right: 1px solid #ddd; padding: 1.25rem; }
    main { flex: 1; padding: 1.5rem 2rem; max-width: 960px; }
    label { display: block; margin-top: 0.75rem; font-weight: 600; }
    input, select, textarea { width: 100%; padding: 0.5rem; box-sizing: border-box; }
    button { margin-top: 0.75rem; padding: 0.6rem 1rem; }
    table { border-collapse: collapse; margin-top: 0.5rem; font-size: 0.9rem; }
    th, td { border: 1px solid #ddd; padding: 0.3rem 0.6rem; text-align: left; }
    .warning { background: #fff4e5; border: 1px solid #f0b35b; padding: 0.75rem; border-radius: 6px; margin: 0.75rem 0; }
    .error { background: #fdecea; border: 1px solid #e57373; padding: 0.75rem; border-radius: 6px; margin: 0.75rem 0; }
    .hidden { display: none; }
    .entry { border-top: 1px solid #eee; padding: 0.75rem 0; }
    .entry .user { font-weight: 600; }
    .entry img { max-width: 100%; margin-top: 0.5rem; }
    .entry figcaption { font-size: 0.8rem; color: #666; }
    #columns li { font-family: monospace; }
  </style>
</head>
<body>
  <aside>
    <h2>Settings</h2>
    <label for="provider">Provider</label>
    <select id="provider"></select>
    <label for="modelInput">Model</label>
    <input id="modelInput" />
    <select id="modelSelect" class="hidden"></select>
    <div id="keyWarning" class="warning hidden"></div>
    <h3>Columns</h3>
    <ul id="columns"></ul>
  </aside>

  <main>
    <h1>Chat with your data</h1>
    <p>Upload a CSV or Excel file, then ask questions about it in plain language.</p>

    <input id="fileInput" type="file" accept=".csv,.xlsx,.xls,.xlsm,.ods" />
    <div id="status"></div>
    <div id="preview"></div>

    <div id="askPanel" class="hidden">
      <label for="query">Ask a question about your data</label>
      <textarea id="query" rows="3"></textarea>
      <button id="runBtn">Run</button>
    </div>

    <div id="history"></div>
  </main>

  <script>
    const $ = (id) => document.getElementById(id);
    let providers = [];
    let sessionId = sessionStorage.getItem('datachat-session');

    async function ensureSession() {
      if (sessionId) {
        const res = await fetch(`/api/sessions/${sessionId}/history`);
        if (res.ok) { renderHistory((await res.json()).history); return; }
      }
      const res = await fetch('/api/sessions', { method: 'POST' });
      sessionId = (await res.json()).session_id;
      sessionStorage.setItem('datachat-session', sessionId);
    }

    function currentProvider() {
      return providers.find(p => p.id === $('provider').value);
    }

    function currentModel() {
      const p = currentProvider();
      if (!p) return null;
      return p.model_input === 'select' ? $('modelSelect').value : $('modelInput').value.trim();
    }

    function renderModelControl() {
      const p = currentProvider();
      if (!p) return;
      const isSelect = p.model_input === 'select';
      $('modelInput').classList.toggle('hidden', isSelect);
      $('modelSelect').classList.toggle('hidden', !isSelect);
      if (isSelect) {
        $('modelSelect').innerHTML = p.models
          .map(m => `<option value="${m.label}">${m.label}</option>`).join('');
      } else {
        $('modelInput').value = p.default_model;
      }
      const warning = $('keyWarning');
      warning.classList.toggle('hidden', p.has_key);
      warning.textContent = p.warning || '';
    }

    async function loadProviders() {
      const res = await fetch('/api/providers');
      providers = await res.json();
      $('provider').innerHTML = providers
        .map(p => `<option value="${p.id}">${p.name}</option>`).join('');
      renderModelControl();
    }

    function showProblem(json) {
      const cls = json.kind === 'warning' ? 'warning' : 'error';
      $('status').innerHTML = `<div class="${cls}"></div>`;
      $('status').firstChild.textContent = json.error || 'Request failed';
    }

    function renderPreview(data) {
      $('columns').innerHTML = '';
      data.columns.forEach(c => {
        const li = document.createElement('li');
        li.textContent = c;
        $('columns').appendChild(li);
      });
      const table = document.createElement('table');
      const head = table.insertRow();
      data.preview.columns.forEach(c => {
        const th = document.createElement('th');
        th.textContent = c;
        head.appendChild(th);
      });
      data.preview.rows.forEach(row => {
        const tr = table.insertRow();
        row.forEach(cell => { tr.insertCell().textContent = cell === null ? '' : String(cell); });
      });
      $('preview').innerHTML = `<h3>Preview (${data.preview.total_rows} rows)</h3>`;
      $('preview').appendChild(table);
    }

    function renderHistory(history) {
      const container = $('history');
      container.innerHTML = '';
      history.forEach(entry => {
        const div = document.createElement('div');
        div.className = 'entry';
        const user = document.createElement('div');
        user.className = 'user';
        user.textContent = entry.user;
        div.appendChild(user);
        if (entry.ai.kind === 'image') {
          const figure = document.createElement('figure');
          const img = document.createElement('img');
          img.src = entry.ai.src;
          const caption = document.createElement('figcaption');
          caption.textContent = entry.ai.caption;
          figure.appendChild(img);
          figure.appendChild(caption);
          div.appendChild(figure);
        } else {
          const text = document.createElement('pre');
          text.textContent = entry.ai.text;
          div.appendChild(text);
        }
        container.appendChild(div);
      });
    }

    $('provider').addEventListener('change', renderModelControl);

    $('fileInput').addEventListener('change', async () => {
      const file = $('fileInput').files[0];
      if (!file) return;
      const form = new FormData();
      form.append('provider', $('provider').value);
      form.append('model', currentModel() || '');
      form.append('file', file);
      $('status').textContent = 'Loading...';
      const res = await fetch(`/api/sessions/${sessionId}/dataset`, { method: 'POST', body: form });
      const json = await res.json();
      if (!res.ok) { showProblem(json); return; }
      $('status').textContent = `Loaded ${json.filename} with ${json.model}`;
      renderPreview(json);
      renderHistory(json.history);
      $('askPanel').classList.remove('hidden');
    });

    $('runBtn').addEventListener('click', async () => {
      const query = $('query').value;
      if (!query.trim()) return;
      $('status').textContent = 'Generating response...';
      $('runBtn').disabled = true;
      try {
        const res = await fetch(`/api/sessions/${sessionId}/ask`, {
          method: 'POST',
          headers: { 'Content-Type': 'application/json' },
          body: JSON.stringify({ provider: $('provider').value, model: currentModel(), query })
        });
        const json = await res.json();
        if (!res.ok) { showProblem(json); return; }
        $('status').textContent = '';
        renderHistory(json.history);
      } finally {
        $('runBtn').disabled = false;
      }
    });

    loadProviders().then(ensureSession);
  </script>
</body>
</html>"#)
}
